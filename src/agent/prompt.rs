//! # Interviewer System Instruction
//!
//! Builds the system prompt that configures the voice agent as a single-voice
//! interviewer for one specific interview. The question-count rule in the
//! prompt is advisory text for the agent — nothing in this service counts
//! questions locally.

use crate::interview::InterviewSpec;

/// Assemble the full system instruction from the interview configuration,
/// the candidate's name, and (possibly empty) company research.
pub fn build_system_instruction(
    spec: &InterviewSpec,
    candidate_name: &str,
    company_research: &str,
) -> String {
    let company_context = match spec.company_name.as_deref().filter(|c| !c.is_empty()) {
        Some(company) => format!(
            "You are a senior employee and interviewer at {company}. You have deep \
             knowledge of the company's culture, engineering practices, and interview \
             standards. You represent {company} and should behave as an insider who \
             knows exactly what the company looks for in candidates."
        ),
        None => "You are a senior professional interviewer. No specific company was \
                 provided, so conduct a general industry-standard interview."
            .to_string(),
    };

    let mut instruction = format!(
        "{company_context}\n\n\
IMPORTANT RULES:\n\
- You are a single person speaking with one voice only. Never roleplay as multiple people or switch between different voices or personas.\n\
- The candidate's name is {candidate_name}.\n\
- You are interviewing them for the role of {role}.\n\
- The difficulty level is {difficulty}.\n\
- Ask exactly {count} questions total. Ask them ONE BY ONE. Wait for the candidate to answer before moving to the next question.\n\
- Provide brief acknowledgment of their answer before asking the next question.\n\
- When all {count} questions have been asked and answered, conclude the interview professionally.\n\
- Internally judge each answer on a scale of 0 to 1 (0 = completely wrong, 0.5 = partial, 1.0 = excellent). Do NOT share the scores during the interview.\n\
- Mix your questions across: company-specific questions, role-specific technical questions, JD-relevant questions, behavioral questions, and your own AI-generated questions relevant to the role.\n",
        role = spec.job_role,
        difficulty = spec.difficulty,
        count = spec.num_questions,
    );

    if let Some(round) = spec.interview_round.as_deref().filter(|r| !r.is_empty()) {
        instruction.push_str(&format!(
            "\nThis is a {round} round interview. Tailor your question style accordingly."
        ));
    }

    if let Some(language) = spec.language.as_deref().filter(|l| !l.is_empty()) {
        instruction.push_str(&format!(
            "\nConduct the entire interview strictly in the language code: {language}."
        ));
    }

    if let Some(jd) = spec.jd_text.as_deref().filter(|j| !j.is_empty()) {
        instruction.push_str(&format!("\n\nJob Description to base questions on:\n{jd}"));
    }

    if !company_research.is_empty() {
        instruction.push_str(&format!(
            "\n\nHere is research about the company and typical interview patterns. \
             Use this to inform your questions:\n{company_research}"
        ));
    }

    instruction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InterviewSpec {
        InterviewSpec {
            job_role: "Backend Engineer".to_string(),
            company_name: Some("Acme".to_string()),
            difficulty: "senior".to_string(),
            num_questions: 7,
            interview_round: Some("system design".to_string()),
            language: None,
            jd_text: None,
        }
    }

    #[test]
    fn test_instruction_carries_interview_parameters() {
        let text = build_system_instruction(&spec(), "Jordan", "");

        assert!(text.contains("interviewer at Acme"));
        assert!(text.contains("The candidate's name is Jordan."));
        assert!(text.contains("role of Backend Engineer"));
        assert!(text.contains("Ask exactly 7 questions total"));
        assert!(text.contains("system design round interview"));
        assert!(text.contains("single person speaking with one voice"));
    }

    #[test]
    fn test_generic_interview_without_company() {
        let mut spec = spec();
        spec.company_name = None;
        let text = build_system_instruction(&spec, "Jordan", "");

        assert!(text.contains("general industry-standard interview"));
        assert!(!text.contains("insider"));
    }

    #[test]
    fn test_optional_sections_appended() {
        let mut spec = spec();
        spec.language = Some("de".to_string());
        spec.jd_text = Some("Own the billing platform.".to_string());

        let text = build_system_instruction(&spec, "Jordan", "Acme asks about queues.");
        assert!(text.contains("strictly in the language code: de"));
        assert!(text.contains("Own the billing platform."));
        assert!(text.contains("Acme asks about queues."));
    }

    #[test]
    fn test_empty_research_adds_no_section() {
        let text = build_system_instruction(&spec(), "Jordan", "");
        assert!(!text.contains("research about the company"));
    }
}
