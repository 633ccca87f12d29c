//! Inline keyboards built from router menus

use keydropcore::requests::MenuOption;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Resource buttons per keyboard row
pub const BUTTONS_PER_ROW: usize = 2;

/// Lays `options` out as callback buttons, two per row.
pub fn resource_keyboard(options: &[MenuOption]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = options
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(|option| InlineKeyboardButton::callback(option.label.clone(), option.data.clone()))
                .collect()
        })
        .collect();

    InlineKeyboardMarkup::new(rows)
}
