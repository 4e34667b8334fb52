//! Prompt Builder - turns an assembled payload into the generator's system prompt
//!
//! The prompt is a pure function of the payload: identical payloads yield
//! byte-identical prompts.

use super::assembler::ContextPayload;
use crate::knowledge::RetrievedChunk;

pub const NO_DOCUMENTS: &str = "No relevant documents retrieved.";
pub const NOT_SPECIFIED: &str = "Not specified";

const GROUNDING_RULES: &str = "\
You are DisasterShift's workforce advisor. You help people understand and respond to \
disaster-driven workforce disruption.

STRICT RULES:
1. ONLY use information from the FORECAST, PREDICTION, STRUCTURED DATA and RETRIEVED KNOWLEDGE sections below.
2. Never invent statistics, dollar amounts, deadlines or program names.
3. If something is not in the provided context, say \"I don't have specific data on that.\"
4. Cite the source of every figure in parentheses, e.g. (frequency forecast), (employment model), (FEMA programs), (WARN Act).
5. Structure the response with clear headers and use the numbers and timelines from the context.
6. When both forecast and prediction data are present, connect them: WHEN risk peaks and WHAT happens to jobs when it hits.
7. Always end with an \"Immediate Next Steps\" section listing 2-3 actions the reader can take today.";

/// Numbered, labelled retrieval blocks
pub fn format_retrieved(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_DOCUMENTS.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut label = format!("[Source {} - {}]", i + 1, chunk.metadata.category);
            if !chunk.metadata.source.is_empty() {
                label.push_str(&format!(" ({})", chunk.metadata.source));
            }
            format!("{}\n{}", label, chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn section(out: &mut String, title: &str, subtitle: &str, body: &str) {
    out.push_str(&format!("\n\n---\n\n{}\n({})\n{}", title, subtitle, body));
}

/// Build the full system prompt for one request
pub fn build_system_prompt(payload: &ContextPayload) -> String {
    let mut out = String::from(GROUNDING_RULES);

    section(
        &mut out,
        "DISASTER FREQUENCY FORECAST",
        "seasonal time-series model: when and how often disasters hit this state",
        &payload.forecast_context,
    );
    section(
        &mut out,
        "EMPLOYMENT IMPACT PREDICTION",
        "sector-level model: what happens to jobs in each sector when a disaster strikes",
        &payload.prediction_context,
    );
    if let Some(structured) = payload.structured_context.as_deref().filter(|s| !s.is_empty()) {
        section(
            &mut out,
            "STRUCTURED DATA",
            "deterministic aggregations over both models' outputs",
            structured,
        );
    }
    section(
        &mut out,
        "RETRIEVED KNOWLEDGE",
        "assistance programs, unemployment benefits, WARN Act, COBRA, retraining, recovery timelines",
        &format_retrieved(&payload.retrieved_chunks),
    );

    out.push_str(&format!(
        "\n\n---\n\nUSER CONTEXT:\n- Location / State: {}\n- Disaster type: {}\n- Job title / Industry: {}",
        payload.state.as_deref().unwrap_or(NOT_SPECIFIED),
        payload.disaster_type.as_deref().unwrap_or(NOT_SPECIFIED),
        payload.job_title.as_deref().unwrap_or(NOT_SPECIFIED),
    ));

    out.push_str(&format!(
        "\n\n---\n\nAUDIENCE: {}\n{}\n\nAnswer the user's question using only the information above. \
         Distinguish the frequency forecast (when and how often disasters occur) from the employment \
         impact prediction (what happens to specific sectors when one hits).",
        payload.audience,
        payload.audience.guidance(),
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::audience::AudienceType;
    use crate::knowledge::{Category, ChunkMetadata};

    // Section headers, as opposed to mentions in the grounding rules
    fn header(title: &str) -> String {
        format!("---\n\n{}\n(", title)
    }

    fn payload() -> ContextPayload {
        ContextPayload {
            forecast_context: "Hurricane Risk Forecast for FL:".into(),
            prediction_context: "Employment Impact Model - Hurricane event in FL Statewide (2 counties):".into(),
            structured_context: None,
            structured: None,
            retrieved_chunks: vec![RetrievedChunk {
                text: "COBRA lets you keep coverage.".into(),
                metadata: ChunkMetadata {
                    category: Category::Cobra,
                    state: None,
                    disaster_type: None,
                    source: "cobra.md".into(),
                },
                similarity: 0.81,
            }],
            audience: AudienceType::Worker,
            state: Some("FL".into()),
            disaster_type: Some("hurricane".into()),
            job_title: None,
        }
    }

    #[test]
    fn test_sections_and_defaults() {
        let prompt = build_system_prompt(&payload());
        assert!(prompt.contains("I don't have specific data on that."));
        assert!(prompt.contains("Immediate Next Steps"));
        assert!(prompt.contains("[Source 1 - cobra] (cobra.md)\nCOBRA lets you keep coverage."));
        assert!(prompt.contains("- Location / State: FL"));
        assert!(prompt.contains("- Job title / Industry: Not specified"));
        assert!(prompt.contains("AUDIENCE: worker"));
        assert!(prompt.contains(&header("RETRIEVED KNOWLEDGE")));
        assert!(!prompt.contains(&header("STRUCTURED DATA")));
    }

    #[test]
    fn test_structured_section_only_when_present() {
        let mut payload = payload();
        payload.structured_context = Some(String::new());
        assert!(!build_system_prompt(&payload).contains(&header("STRUCTURED DATA")));

        payload.structured_context = Some("Sector Employment Rankings - FL Hurricane:".into());
        let prompt = build_system_prompt(&payload);
        let prediction = prompt.find(&header("EMPLOYMENT IMPACT PREDICTION")).unwrap();
        let structured = prompt.find(&header("STRUCTURED DATA")).unwrap();
        let retrieved = prompt.find(&header("RETRIEVED KNOWLEDGE")).unwrap();
        assert!(prediction < structured && structured < retrieved);
        assert!(prompt.contains("(deterministic aggregations over both models' outputs)\nSector Employment Rankings"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let mut payload = payload();
        payload.retrieved_chunks.clear();
        let first = build_system_prompt(&payload);
        assert_eq!(first, build_system_prompt(&payload.clone()));
        assert!(first.contains(NO_DOCUMENTS));
    }
}
