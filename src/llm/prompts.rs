pub const STYLE_ANALYSIS_PROMPT: &str = "Analyze and describe this image's visual characteristics in detail. \
Focus on elements needed for artistic replication. Cover: lighting (e.g., 'soft, diffused window light'), \
pose, background (e.g., 'blurry, urban city street at night'), artistic style (e.g., 'vintage, cinematic, \
90s film look'), outfit details, and camera angle (e.g., 'low-angle shot').";

/// Builds the single instruction sent with the user image. The style text is embedded unmodified.
pub fn build_synthesis_prompt(style_description: &str) -> String {
    format!(
        "**PRIMARY GOAL: Recreate the provided image of a person to match a new artistic style.**

**INPUTS:**
1.  **USER IMAGE:** The image of the person to be edited.
2.  **STYLE DESCRIPTION:** A detailed text description of the target style.

**STYLE DESCRIPTION TO APPLY:**
---
{style_description}
---

**CRITICAL INSTRUCTIONS:**
1.  **IDENTITY PRESERVATION (ABSOLUTE PRIORITY):** The face of the person in the USER IMAGE must be preserved with 100% accuracy. Do not alter their facial features, expression, or identity in any way. This is the most important rule.
2.  **STYLE APPLICATION:** Apply all the elements from the STYLE DESCRIPTION to the USER IMAGE. This includes the lighting, background, pose, outfit, and overall artistic mood.
3.  **SEAMLESS INTEGRATION:** The final result should be a high-quality, photorealistic image where the original person looks naturally placed within the new, described environment and style.

**TASK:** Generate the edited image based on these rules."
    )
}
