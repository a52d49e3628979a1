// Dermatology analysis prompt shared by every provider
use crate::classifier::{ClassificationResult, LesionClass};
use std::fmt::Write;

/// Label sent before the attention-map image
pub const OVERLAY_LABEL: &str = "Attention map (Grad-CAM):";

const TASK: &str = "
**TASK:**
Analyze the dermoscopic image provided and write a complete diagnostic report for dermatology residency study, including:

1. **Detailed Visual Analysis:**
   - Describe the dermoscopic patterns observed (pigment network, globules, streaks, blue-white veil, etc.)
   - Assess asymmetry, borders, colors and diameter (ABCD criteria)
   - Evaluate specific structures (dots, lines, structureless areas)

2. **Correlation with the Automated Classification:**
   - Compare your visual analysis with the class predicted by the model
   - Assess whether the model confidence is consistent with the visual findings
   - Point out possible discrepancies or areas of concern

3. **Differential Diagnosis:**
   - List the 2-3 main differential diagnoses
   - Justify each one based on the findings

4. **Clinical Recommendations:**
   - Suggest next steps (follow-up, biopsy, excision, etc.)
   - State the urgency (routine, priority, urgent)
   - Mention relevant risk factors

5. **Educational Note:**
   - Highlight learning points for residents
   - Cite relevant diagnostic criteria or references

**FORMAT:** Use Markdown with clear sections. Be objective, precise and educational.

**IMPORTANT:** This is a study aid. Always correlate with the clinical history and a complete physical examination.
";

/// Build the analysis prompt for a classification
pub fn build_prompt(classification: &ClassificationResult, has_overlay: bool) -> String {
    let mut prompt = String::from(
        "You are a dermatologist specialized in skin lesion analysis, teaching medical residents.\n\n",
    );

    prompt.push_str("**AUTOMATED CLASSIFICATION DATA (CNN):**\n");
    // Writing to a String cannot fail
    let _ = writeln!(prompt, "- Predicted class: {}", classification.predicted_class);
    let _ = writeln!(prompt, "- Confidence: {:.1}%", classification.confidence * 100.0);
    let _ = writeln!(prompt, "- Risk tier: {}", classification.risk_tier);
    prompt.push_str("- Probabilities:\n");
    for class in LesionClass::ALL {
        let _ = writeln!(
            prompt,
            "  * {}: {:.1}%",
            class,
            classification.probability_of(class) * 100.0
        );
    }

    if has_overlay {
        prompt.push_str(
            "\n**ATTENTION MAP (Grad-CAM):** Attention map provided below the lesion image \
             (red areas mark the regions that weighed most in the classification).\n",
        );
    }

    prompt.push_str(TASK);
    prompt
}
