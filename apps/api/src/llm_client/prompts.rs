// Cross-cutting prompt fragments shared by every judgment prompt.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps the judgment tied to what the documents actually say.
pub const EVIDENCE_INSTRUCTION: &str = "\
    Judge only from the text provided. Do NOT assume skills, employers, or years of \
    experience that the resume does not state. A skill counts as matching only when \
    both documents mention it or an unmistakable equivalent.";
