use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};

/// Client for a Gemini-style `generateContent` endpoint.
///
/// The API credential travels in a header, never in the URL, so it cannot end
/// up in upstream access logs.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

fn build_generate_url(base_url: &str, model: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/v1beta/models/{model}:generateContent")
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("budget-ai-proxy/2.0")
            // Avoid hanging forever on broken upstream TCP handshakes.
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self { client }
    }

    /// One analysis call. Generation parameters are fixed: the client has no
    /// say in sampling, and the response is forced into JSON mode.
    pub async fn generate(
        &self,
        base_url: &str,
        model: &str,
        api_key: &str,
        system_prompt: &str,
        analysis_prompt: &str,
        timeout_seconds: u64,
    ) -> Result<(u16, Value), reqwest::Error> {
        let url = build_generate_url(base_url, model);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(hv) = HeaderValue::from_str(api_key) {
            headers.insert("x-goog-api-key", hv);
        }

        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": system_prompt},
                    {"text": analysis_prompt}
                ]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json"
            },
            "safetySettings": [
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
                {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"}
            ]
        });

        let r = self
            .client
            .post(url)
            .headers(headers)
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .json(&payload)
            .send()
            .await?;

        let status = r.status().as_u16();
        let j = r.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, j))
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Digs the completion text out of a generateContent response body.
pub fn extract_candidate_text(body: &Value) -> Option<&str> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Error detail from an upstream failure body. Logged, never shown to clients.
pub fn upstream_error_detail(body: &Value) -> String {
    body.pointer("/error/message")
        .and_then(|v| v.as_str())
        .unwrap_or("upstream error")
        .to_string()
}

/// Parses the completion into a JSON object: direct parse first, then the
/// first balanced `{...}` span (models sometimes wrap JSON in prose even in
/// JSON response mode).
pub fn parse_result_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() {
            return Some(v);
        }
    }
    let span = first_balanced_object(text)?;
    serde_json::from_str::<Value>(span)
        .ok()
        .filter(|v| v.is_object())
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_url_tolerates_trailing_slash() {
        assert_eq!(
            build_generate_url("https://example.com/", "gemini-test"),
            "https://example.com/v1beta/models/gemini-test:generateContent"
        );
    }

    #[test]
    fn extracts_candidate_text() {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"summary\":\"ok\"}"}]}}]
        });
        assert_eq!(extract_candidate_text(&body), Some("{\"summary\":\"ok\"}"));
        assert_eq!(extract_candidate_text(&serde_json::json!({})), None);
        let empty = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "  "}]}}]
        });
        assert_eq!(extract_candidate_text(&empty), None);
    }

    #[test]
    fn parses_direct_json() {
        let v = parse_result_json("{\"summary\": \"fine\"}").unwrap();
        assert_eq!(v["summary"], "fine");
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let text = "Here is your analysis:\n```json\n{\"summary\": \"ok\", \"pattern\": {\"riskLevel\": \"low\"}}\n```\nEnjoy!";
        let v = parse_result_json(text).unwrap();
        assert_eq!(v["pattern"]["riskLevel"], "low");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = "note {\"summary\": \"use {curly} braces wisely\"} trailing";
        let v = parse_result_json(text).unwrap();
        assert_eq!(v["summary"], "use {curly} braces wisely");
    }

    #[test]
    fn unparsable_text_yields_none() {
        assert!(parse_result_json("no json here").is_none());
        assert!(parse_result_json("{broken").is_none());
        assert!(parse_result_json("[1, 2, 3]").is_none());
    }
}
