//! Inline keyboard for the model menu.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use easel_api::ModelInfo;

pub const MODEL_CALLBACK_PREFIX: &str = "model:";

/// One button per row so long model names stay readable.
pub fn model_keyboard(models: &[ModelInfo]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = models
        .iter()
        .map(|model| {
            let label = if model.display_name.is_empty() {
                model.id.clone()
            } else {
                model.display_name.clone()
            };
            vec![InlineKeyboardButton::callback(
                label,
                format!("{MODEL_CALLBACK_PREFIX}{}", model.id),
            )]
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Parse a menu tap's payload back into a model id. Payloads from other
/// keyboards return `None`.
pub fn parse_model_callback(data: &str) -> Option<&str> {
    data.strip_prefix(MODEL_CALLBACK_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn info(id: &str, display_name: &str) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            name: format!("models/{id}"),
            display_name: display_name.to_string(),
            description: String::new(),
            methods: vec!["generateContent".to_string()],
        }
    }

    #[test]
    fn one_button_per_model_row() {
        let markup = model_keyboard(&[info("a", "Model A"), info("b", "")]);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Model A");
        // A blank display name falls back to the id.
        assert_eq!(markup.inline_keyboard[1][0].text, "b");
    }

    #[test]
    fn callback_payload_round_trips() {
        let markup = model_keyboard(&[info("nano-banana", "Nano Banana")]);
        match &markup.inline_keyboard[0][0].kind {
            InlineKeyboardButtonKind::CallbackData(data) => {
                assert_eq!(parse_model_callback(data), Some("nano-banana"));
            }
            other => panic!("unexpected button kind: {other:?}"),
        }
    }

    #[test]
    fn foreign_payloads_are_ignored() {
        assert_eq!(parse_model_callback("page:2"), None);
        assert_eq!(parse_model_callback("model"), None);
        assert_eq!(parse_model_callback(""), None);
    }
}
