// Prompt constants for resume screening.
// Reuses cross-cutting fragments from llm_client::prompts.

/// Recruiter persona; the JSON-only fragment is appended by the scorer.
pub const SCREENING_PERSONA: &str = "You are an expert HR recruiter screening candidates. \
    Compare a resume with a job description and return a structured verdict.";

/// Screening prompt template. Replace `{job_description}`, `{resume_text}` and
/// `{evidence_instruction}` before sending.
pub const SCREENING_PROMPT_TEMPLATE: &str = r#"Compare the following resume with the job description.

Job Description:
{job_description}

Resume:
{resume_text}

Return a JSON object with this EXACT schema (no extra fields):
{
  "score": 78,
  "verdict": "Shortlisted",
  "reason": "Meets the core backend requirements; lacks Kafka.",
  "matching_skills": ["Rust", "PostgreSQL"],
  "missing_skills": ["Kafka"],
  "summary": "Senior backend engineer with five years of Rust."
}

Rules:
- score is an integer from 0 to 100 measuring how well the resume matches the job.
- verdict MUST follow the score: 70 or above is "Shortlisted", 50 to 69 is "Maybe",
  below 50 is "Rejected".
- reason is one sentence explaining the verdict.
- matching_skills lists skills found in both documents.
- missing_skills lists skills the job requires that the resume does not show.
- summary is a brief analysis of the candidate's suitability.

{evidence_instruction}"#;
