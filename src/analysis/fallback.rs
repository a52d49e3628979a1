// Deterministic local report used when no remote provider succeeded
use super::provider::ProviderAnalysisResult;
use crate::classifier::{ClassificationResult, LesionClass, RiskTier};

/// Model identifier reported for locally generated reports
pub const LOCAL_MODEL_ID: &str = "cnn_only";

const MALIGNANT_INTERPRETATION: &str = "This lesion was classified as **potentially malignant** by the deep learning model.

**Suggestive Findings:**
- Dermoscopic patterns compatible with malignancy
- High probability of a suspicious lesion

**Recommendations:**
- **URGENT:** Refer to a dermatologist immediately
- Consider excisional biopsy for histopathological confirmation
- Do not postpone specialist evaluation
- Serial photographic documentation
- Evaluation of regional lymph nodes

";

const UNCERTAIN_MALIGNANT_INTERPRETATION: &str = "This lesion was classified as **possibly malignant** by the deep learning model, with low confidence.

**Suggestive Findings:**
- Some dermoscopic patterns compatible with malignancy
- The model output is close to the decision threshold

**Recommendations:**
- Prompt dermatologist evaluation recommended (priority, not emergency)
- Dermoscopic re-examination by a specialist before deciding on biopsy
- Serial photographic documentation
- Short-interval follow-up if biopsy is deferred

";

const UNCERTAIN_BENIGN_INTERPRETATION: &str = "This lesion was classified as **probably benign** by the deep learning model, with low confidence.

**Suggestive Findings:**
- Dermoscopic patterns mostly compatible with a benign lesion
- The model output is close to the decision threshold

**Recommendations:**
- Dermatological evaluation at the next available routine appointment
- Short-interval follow-up (about 3 months) to confirm stability
- Photographic documentation for future comparison
- Monthly self-examination

";

const BENIGN_INTERPRETATION: &str = "This lesion was classified as **probably benign** by the deep learning model.

**Suggestive Findings:**
- Dermoscopic patterns compatible with a benign lesion
- Low risk of malignancy

**Recommendations:**
- Routine dermatological follow-up
- Monitor for changes (size, color, shape)
- Photographic documentation for future comparison
- Monthly self-examination
- Adequate sun protection (SPF 50+)

";

const CLOSING: &str = "### 3. Differential Diagnosis

Consult a dermatologist for a complete evaluation and an appropriate differential diagnosis.

### 4. Limitations

- Analysis based only on the automated classification
- No detailed visual evaluation by a multimodal model
- Requires correlation with clinical history and physical examination

### 5. Important Note

This system is a study aid for dermatology residents. It **does NOT replace an in-person clinical evaluation** by a qualified dermatologist. Always correlate with the clinical findings and the patient's history.

---
*Generated locally from the CNN classification only*
";

fn interpretation(classification: &ClassificationResult) -> &'static str {
    match (classification.predicted_class, classification.risk_tier) {
        (LesionClass::Malignant, RiskTier::Moderate) => UNCERTAIN_MALIGNANT_INTERPRETATION,
        (LesionClass::Malignant, _) => MALIGNANT_INTERPRETATION,
        (LesionClass::Benign, RiskTier::Moderate) => UNCERTAIN_BENIGN_INTERPRETATION,
        (LesionClass::Benign, _) => BENIGN_INTERPRETATION,
    }
}

/// Render the report text; depends only on the classification
pub fn render_report(classification: &ClassificationResult) -> String {
    let interpretation = interpretation(classification);

    format!(
        "## Automated Diagnostic Report

**NOTE:** Multimodal analysis unavailable. Report based only on the CNN classification.

### 1. Classification Result

- **Predicted class:** {}
- **Confidence:** {:.1}%
- **Risk tier:** {}

### 2. Interpretation

{}{}",
        classification.predicted_class,
        classification.confidence * 100.0,
        classification.risk_tier,
        interpretation,
        CLOSING
    )
}

/// Build the fallback result; `reason` explains why no remote analysis is attached
pub fn local_report(classification: &ClassificationResult, reason: impl Into<String>) -> ProviderAnalysisResult {
    ProviderAnalysisResult::local(render_report(classification), LOCAL_MODEL_ID, reason)
}
