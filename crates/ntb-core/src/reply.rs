/// Transport-neutral response to a user action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Telegram-flavoured HTML.
    pub html: String,
    pub keyboard: Option<InlineKeyboard>,
}

impl Reply {
    pub fn text(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Inline keyboard (buttons grouped in rows) attached to a reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.is_empty())
    }

    /// One button per row, labels truncated to `max_label_len` characters.
    pub fn one_per_row(buttons: Vec<InlineButton>, max_label_len: usize) -> Self {
        let rows = buttons
            .into_iter()
            .map(|mut b| {
                if b.label.chars().count() > max_label_len {
                    b.label = format!(
                        "{}...",
                        b.label.chars().take(max_label_len).collect::<String>()
                    );
                }
                vec![b]
            })
            .collect();
        Self { rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_per_row_truncates_long_labels() {
        let kb = InlineKeyboard::one_per_row(
            vec![
                InlineButton::new("short", "a"),
                InlineButton::new("Задача с очень длинным названием", "b"),
            ],
            10,
        );
        assert_eq!(kb.rows.len(), 2);
        assert_eq!(kb.rows[0][0].label, "short");
        assert_eq!(kb.rows[1][0].label, "Задача с о...");
        assert_eq!(kb.rows[1][0].callback_data, "b");
    }
}
