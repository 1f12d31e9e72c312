//! Terminal rendering of markdown output.
//!
//! Rich output goes through a termimad skin, which also lays out tables.
//! Plain output prints the markdown as is and is used when colors are
//! disabled or stdout is not a terminal.

use std::io::IsTerminal;

use termimad::{crossterm::style::Color, MadSkin};

pub struct TerminalRenderer {
    rich_enabled: bool,
    skin: MadSkin,
}

impl TerminalRenderer {
    /// Rich output is only used when requested and stdout is a terminal.
    pub fn new(rich_requested: bool) -> Self {
        let mut skin = MadSkin::default();
        skin.set_headers_fg(Color::Blue);
        skin.bold.set_fg(Color::Yellow);
        skin.code_block.set_bg(Color::AnsiValue(238));
        skin.inline_code.set_bg(Color::AnsiValue(238));

        Self {
            rich_enabled: rich_requested && std::io::stdout().is_terminal(),
            skin,
        }
    }

    pub fn render(&self, markdown: &str) {
        if self.rich_enabled {
            self.skin.print_text(markdown);
        } else if markdown.ends_with('\n') {
            print!("{markdown}");
        } else {
            println!("{markdown}");
        }
    }
}
