//! Markdown output for the terminal.
//!
//! Every core display type formats as markdown. With color enabled it goes
//! through a termimad skin; otherwise it is printed verbatim, which is also
//! what the integration tests read.

use std::fmt::Display;

use termimad::{crossterm::style::Color, MadSkin};

pub struct TerminalRenderer {
    rich: bool,
    skin: MadSkin,
}

impl TerminalRenderer {
    pub fn new(rich: bool) -> Self {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(Color::Cyan);
        skin.bold.set_fg(Color::Yellow);
        skin.inline_code.set_fg(Color::Green);
        skin.code_block.set_bg(Color::AnsiValue(236));
        Self { rich, skin }
    }

    pub fn render(&self, value: impl Display) {
        let markdown = value.to_string();
        if self.rich {
            self.skin.print_text(&markdown);
        } else {
            print!("{markdown}");
        }
    }

    /// Pretty JSON, fenced when rendering rich.
    pub fn render_json(&self, json: &str) {
        if self.rich {
            self.skin.print_text(&format!("```json\n{json}\n```\n"));
        } else {
            println!("{json}");
        }
    }
}
