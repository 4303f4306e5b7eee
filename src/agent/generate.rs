//! # Request/Response Collaborators
//!
//! The three one-shot calls around the realtime session:
//! - **Token minting** — a short-lived credential for opening the duplex
//!   channel. When no token service is configured the API key itself is used;
//!   either way the credential never leaves this process.
//! - **Company research** — free text injected verbatim into the interviewer
//!   prompt. Best-effort: the session proceeds with empty context on failure.
//! - **Transcript evaluation** — called exactly once per ended interview
//!   (plus user-initiated retries), returning a structured score breakdown.
//!
//! Rate limiting on evaluation is surfaced as its own error kind so the
//! client can show quota guidance instead of a generic failure.

use crate::config::AgentConfig;
use crate::error::{AppError, AppResult};
use crate::interview::transcript::{Speaker, TranscriptEntry};
use crate::interview::InterviewSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

/// Structured result of scoring one interview transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub questions: Vec<QuestionScore>,
    pub total_score: f32,
    #[serde(default)]
    pub total_questions: u32,
    pub summary_feedback: String,
}

/// Per-question verdict inside an [`Evaluation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question: String,
    /// 0.0 = no answer, 0.5 = partial, 1.0 = excellent
    pub score: f32,
    pub feedback: String,
}

/// Everything the evaluator needs about one finished interview.
pub struct EvaluationRequest<'a> {
    pub interview_id: &'a str,
    pub transcript: &'a [TranscriptEntry],
    pub job_role: &'a str,
    pub num_questions: u32,
    pub company_name: Option<&'a str>,
    pub jd_text: Option<&'a str>,
    pub duration_seconds: u64,
}

/// Client for the hosted text-generation API.
pub struct GenerateClient {
    http: reqwest::Client,
    agent: AgentConfig,
    api_key: String,
}

impl GenerateClient {
    /// Build a client, reading the API key from the configured environment
    /// variable. Failing here (missing key) aborts session start before any
    /// resource is acquired.
    pub fn new(agent: &AgentConfig) -> AppResult<Self> {
        let api_key = env::var(&agent.api_key_env).map_err(|_| {
            AppError::ConfigError(format!(
                "agent API key environment variable '{}' is not set",
                agent.api_key_env
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| AppError::Internal(err.to_string()))?;

        Ok(Self {
            http,
            agent: agent.clone(),
            api_key,
        })
    }

    /// Obtain the credential for opening the duplex channel. Session-scoped
    /// and short-lived when a token service is configured.
    pub async fn mint_session_token(&self) -> AppResult<String> {
        if self.agent.token_url.is_empty() {
            return Ok(self.api_key.clone());
        }

        let response = self
            .http
            .post(&self.agent.token_url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("malformed token response: {}", err)))?;
        Ok(token.token)
    }

    /// Fetch interview-preparation research for the configured company/role.
    /// Callers treat any failure as "no research available".
    pub async fn research_company(&self, spec: &InterviewSpec) -> AppResult<String> {
        let round = spec.interview_round.as_deref().unwrap_or("general");
        let prompt = match spec.company_name.as_deref().filter(|c| !c.is_empty()) {
            Some(company) => format!(
                "Research the company \"{company}\" for a job interview preparation. The \
                 candidate is applying for the role of \"{role}\" and the interview round \
                 is \"{round}\".\n\n\
                 Please provide:\n\
                 1. **Company Overview**: What the company does, its culture, values, and recent news\n\
                 2. **Interview Process**: Typical interview rounds and format at this company for this role\n\
                 3. **Common Interview Questions**: 10-15 frequently asked questions at {company} for {role} positions\n\
                 4. **Technical Focus Areas**: Key technical skills and topics they typically test\n\
                 5. **Tips**: Specific advice for succeeding in a {round} interview at {company}\n\n\
                 Be specific and factual. Use real data from the internet.",
                role = spec.job_role,
            ),
            None => format!(
                "Provide general interview preparation guidance for a \"{role}\" position. \
                 The interview round is \"{round}\".\n\n\
                 Please provide:\n\
                 1. **Role Overview**: What this role typically entails\n\
                 2. **Common Interview Questions**: 10-15 frequently asked questions for {role} positions\n\
                 3. **Technical Focus Areas**: Key skills and topics typically tested\n\
                 4. **Tips**: Advice for succeeding in a {round} interview for this role\n\n\
                 Be specific and practical.",
                role = spec.job_role,
            ),
        };

        let text = self
            .generate_text(&self.agent.research_model, &prompt, true)
            .await?;
        debug!(chars = text.len(), "company research fetched");
        Ok(text)
    }

    /// Score one finished interview. Returns `RateLimited` on quota errors so
    /// the retry surface can distinguish them.
    pub async fn evaluate_transcript(&self, request: &EvaluationRequest<'_>) -> AppResult<Evaluation> {
        if request.transcript.is_empty() {
            return Err(AppError::BadRequest(
                "cannot evaluate an empty transcript".to_string(),
            ));
        }

        let prompt = evaluation_prompt(request);
        let raw = self
            .generate_text(&self.agent.evaluation_model, &prompt, false)
            .await?;
        let evaluation = parse_evaluation(&raw)?;

        info!(
            interview_id = %request.interview_id,
            total_score = evaluation.total_score,
            "interview evaluated"
        );
        Ok(evaluation)
    }

    async fn generate_text(&self, model: &str, prompt: &str, with_search: bool) -> AppResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.agent.generate_url, model
        );

        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        if with_search {
            body["tools"] = json!([{ "googleSearch": {} }]);
        }

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited(format!(
                "generation quota exhausted for model {}",
                model
            )));
        }
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            return Err(AppError::Upstream(format!(
                "generation call failed ({}): {}",
                status, detail
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("malformed generation response: {}", err)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        Ok(text)
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Deserialize)]
struct GenerateCandidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn format_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let who = match entry.speaker {
                Speaker::Agent => "Interviewer",
                Speaker::User => "Candidate",
            };
            format!("{}: {}", who, entry.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn evaluation_prompt(request: &EvaluationRequest<'_>) -> String {
    let mut context = format!(
        "- Role: {}\n- Total expected questions: {}\n- Interview duration: {} seconds",
        request.job_role, request.num_questions, request.duration_seconds
    );
    if let Some(company) = request.company_name.filter(|c| !c.is_empty()) {
        context.push_str(&format!("\n- Company: {}", company));
    }
    if let Some(jd) = request.jd_text.filter(|j| !j.is_empty()) {
        context.push_str(&format!("\n- Job description:\n{}", jd));
    }

    format!(
        "You are an expert interview evaluator. Analyze the following interview transcript \
         and provide a detailed evaluation.\n\n\
         **Interview Context:**\n{context}\n\n\
         **Transcript:**\n{transcript}\n\n\
         **Your Task:**\n\
         Analyze each question-answer pair from the transcript. For each question the \
         interviewer asked and the candidate answered, provide:\n\
         1. The question text\n\
         2. A score from 0.0 to 1.0 (0 = completely wrong/no answer, 0.5 = partial, 1.0 = excellent answer)\n\
         3. Brief feedback on the answer\n\n\
         Then provide an overall summary with specific improvement suggestions.\n\n\
         **IMPORTANT: Respond ONLY with valid JSON in this exact format, no markdown code blocks:**\n\
         {{\n\
             \"questions\": [\n\
                 {{\n\
                     \"question\": \"The exact question asked\",\n\
                     \"score\": 0.75,\n\
                     \"feedback\": \"Brief feedback on the answer quality\"\n\
                 }}\n\
             ],\n\
             \"totalScore\": 7.5,\n\
             \"totalQuestions\": 10,\n\
             \"summaryFeedback\": \"A detailed 3-5 paragraph summary covering: 1) Overall performance assessment, 2) Key strengths demonstrated, 3) Specific weaknesses and areas needing improvement with concrete suggestions on what to study/practice, 4) Actionable next steps for the candidate\"\n\
         }}",
        transcript = format_transcript(request.transcript),
    )
}

/// Evaluators occasionally wrap their JSON in markdown fences despite the
/// instruction not to; strip them before parsing.
pub(crate) fn parse_evaluation(raw: &str) -> AppResult<Evaluation> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim())
        .map_err(|err| AppError::Upstream(format!("evaluator returned malformed JSON: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Vec<TranscriptEntry> {
        vec![
            TranscriptEntry {
                speaker: Speaker::Agent,
                text: "Tell me about yourself.".to_string(),
            },
            TranscriptEntry {
                speaker: Speaker::User,
                text: "I have five years experience".to_string(),
            },
        ]
    }

    #[test]
    fn test_format_transcript_labels_speakers() {
        let formatted = format_transcript(&transcript());
        assert_eq!(
            formatted,
            "Interviewer: Tell me about yourself.\n\nCandidate: I have five years experience"
        );
    }

    #[test]
    fn test_parse_evaluation_strips_fences() {
        let raw = "```json\n{\"questions\": [{\"question\": \"Q1\", \"score\": 0.5, \
                   \"feedback\": \"ok\"}], \"totalScore\": 0.5, \"totalQuestions\": 1, \
                   \"summaryFeedback\": \"fine\"}\n```";
        let evaluation = parse_evaluation(raw).unwrap();

        assert_eq!(evaluation.questions.len(), 1);
        assert_eq!(evaluation.questions[0].question, "Q1");
        assert!((evaluation.total_score - 0.5).abs() < f32::EPSILON);
        assert_eq!(evaluation.total_questions, 1);
    }

    #[test]
    fn test_parse_evaluation_rejects_garbage() {
        let err = parse_evaluation("I could not evaluate this interview.").unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn test_evaluation_prompt_includes_context() {
        let entries = transcript();
        let request = EvaluationRequest {
            interview_id: "abc",
            transcript: &entries,
            job_role: "Backend Engineer",
            num_questions: 5,
            company_name: Some("Acme"),
            jd_text: None,
            duration_seconds: 840,
        };
        let prompt = evaluation_prompt(&request);

        assert!(prompt.contains("Role: Backend Engineer"));
        assert!(prompt.contains("Total expected questions: 5"));
        assert!(prompt.contains("Company: Acme"));
        assert!(prompt.contains("840 seconds"));
        assert!(prompt.contains("Interviewer: Tell me about yourself."));
    }
}
