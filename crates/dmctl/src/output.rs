use serde::Serialize;

fn to_json<T: Serialize>(value: &T, pretty: bool) -> String {
    let encoded = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    encoded.unwrap_or_else(|e| format!("{{\"status\":\"error\",\"error\":\"{}\"}}", e))
}

/// Output formatter that supports both human-readable and JSON output
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Output a successful result
    pub fn success<T: Serialize>(&self, command: &str, data: T) {
        if self.json {
            let response = JsonResponse {
                status: "ok",
                command,
                data: Some(data),
                error: None,
            };
            println!("{}", to_json(&response, false));
        } else {
            println!("{}", to_json(&data, true));
        }
    }

    /// Output a simple success message
    pub fn success_message(&self, command: &str, message: &str) {
        if self.json {
            let response = JsonResponse {
                status: "ok",
                command,
                data: Some(serde_json::json!({ "message": message })),
                error: None,
            };
            println!("{}", to_json(&response, false));
        } else {
            println!("{}", message);
        }
    }

    pub fn error(&self, message: &str) {
        if self.json {
            let response: JsonResponse<()> = JsonResponse {
                status: "error",
                command: "",
                data: None,
                error: Some(message.to_string()),
            };
            eprintln!("{}", to_json(&response, false));
        } else {
            eprintln!("Error: {}", message);
        }
    }

    /// One item of a stream, e.g. a live snapshot from `watch`
    pub fn event<T: Serialize>(&self, event_type: &str, data: T) {
        if self.json {
            let event = StreamEvent {
                event: event_type,
                data,
            };
            println!("{}", to_json(&event, false));
        } else {
            println!("[{}] {}", event_type, to_json(&data, true));
        }
    }
}

#[derive(Serialize)]
struct JsonResponse<'a, T: Serialize> {
    status: &'a str,
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct StreamEvent<'a, T: Serialize> {
    event: &'a str,
    data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_modes() {
        assert!(Output::new(true).json);
        assert!(!Output::new(false).json);
    }

    #[test]
    fn test_json_response_omits_empty_fields() {
        let response: JsonResponse<()> = JsonResponse {
            status: "ok",
            command: "send",
            data: None,
            error: None,
        };
        assert_eq!(
            to_json(&response, false),
            r#"{"status":"ok","command":"send"}"#
        );
    }

    #[test]
    fn test_stream_event_nests_data() {
        let event = StreamEvent {
            event: "messages",
            data: vec![1, 2],
        };
        assert_eq!(to_json(&event, false), r#"{"event":"messages","data":[1,2]}"#);
    }
}
