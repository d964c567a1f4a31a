use serde_json::Value;

/// Extracts the plain text of an opaque document-tree string.
///
/// The document format is only ever parsed here; everything else in the
/// mirror treats these strings as opaque. The output feeds the denormalized
/// search column, so it must stay deterministic between an initial upsert
/// and any later re-upsert of the same input.
pub(crate) fn extract_plain_text(adf: &str) -> String {
    if adf.is_empty() {
        return String::new();
    }

    match serde_json::from_str::<Value>(adf) {
        Ok(node) => {
            let mut output = String::new();
            collect_plain_text(&node, &mut output);
            output
        }
        Err(_) => String::new()
    }
}

fn collect_plain_text(node: &Value, output: &mut String) {
    let node_type = node.get("type").and_then(Value::as_str).unwrap_or_default();

    match node_type {
        "text" => {
            if let Some(text) = node.get("text").and_then(Value::as_str) {
                output.push_str(text);
            }
        }
        "hardBreak" => output.push('\n'),
        "heading" | "paragraph" => {
            collect_children(node, output);
            output.push('\n');
        }
        _ => collect_children(node, output)
    }
}

fn collect_children(node: &Value, output: &mut String) {
    if let Some(content) = node.get("content").and_then(Value::as_array) {
        for child in content {
            collect_plain_text(child, output);
        }
    }
}

/// Shortens extracted plain text for list previews.
pub(crate) fn preview(adf: &str, max_chars: usize) -> String {
    let text = extract_plain_text(adf);

    if text.chars().count() <= max_chars {
        return text;
    }

    let mut shortened = text.chars().take(max_chars).collect::<String>();
    shortened.push_str("...");
    shortened
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_input_yields_nothing() {
        // Not a document tree, so nothing to extract
        assert_eq!(extract_plain_text("just some text"), "");
        assert_eq!(extract_plain_text(""), "");
    }

    #[test]
    fn paragraphs_and_breaks() {
        let adf = r#"{"type":"doc","content":[
            {"type":"paragraph","content":[
                {"type":"text","text":"The game "},
                {"type":"text","text":"crashed","marks":[{"type":"strong"}]},
                {"type":"hardBreak"},
                {"type":"text","text":"on startup"}
            ]},
            {"type":"paragraph","content":[{"type":"text","text":"every time"}]}
        ]}"#;

        assert_eq!(extract_plain_text(adf), "The game crashed\non startup\nevery time\n");
    }

    #[test]
    fn nested_structures_are_flattened() {
        let adf = r#"{"type":"doc","content":[
            {"type":"bulletList","content":[
                {"type":"listItem","content":[
                    {"type":"paragraph","content":[{"type":"text","text":"first"}]}
                ]},
                {"type":"listItem","content":[
                    {"type":"paragraph","content":[{"type":"text","text":"second"}]}
                ]}
            ]}
        ]}"#;

        assert_eq!(extract_plain_text(adf), "first\nsecond\n");
    }

    #[test]
    fn extraction_is_deterministic() {
        let adf = r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"same"}]}]}"#;

        assert_eq!(extract_plain_text(adf), extract_plain_text(adf));
    }

    #[test]
    fn preview_shortens_long_text() {
        let adf = r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"abcdefghij"}]}]}"#;

        assert_eq!(preview(adf, 5), "abcde...");
        assert_eq!(preview(adf, 200), "abcdefghij\n");
    }
}
