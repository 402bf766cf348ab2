use serde::{Deserialize, Serialize};

/// One corpus unit: the text of a single chat message plus the first media
/// attachment it carried, keyed by the platform-assigned message id.
///
/// The persisted field for the text is called `string`, matching the on-disk
/// store format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "string")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, uri: impl Into<String>) -> Self {
        self.attachment = Some(uri.into());
        self
    }

    /// Stand-in record used when no persisted store can be read, so the
    /// model builder never sees a literally empty collection.
    pub fn placeholder() -> Self {
        Self::new("0", "")
    }
}

/// Shape of the persisted record store file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesFile {
    pub messages: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::{MessagesFile, Record};

    #[test]
    fn record_serializes_text_as_string_field() {
        let json = serde_json::to_value(Record::new("42", "hello there")).unwrap();
        assert_eq!(json["id"], "42");
        assert_eq!(json["string"], "hello there");
        assert!(json.get("attachment").is_none());
    }

    #[test]
    fn attachment_is_optional_on_read() {
        let file: MessagesFile = serde_json::from_str(
            r#"{"messages":[{"id":"1","string":"a"},{"id":"2","string":"b","attachment":"https://cdn/x.png"}]}"#,
        )
        .unwrap();
        assert_eq!(file.messages[0].attachment, None);
        assert_eq!(file.messages[1].attachment.as_deref(), Some("https://cdn/x.png"));
    }
}
