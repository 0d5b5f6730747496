use inquire::{
    Confirm, Password, PasswordDisplayMode, Select, Text,
    ui::{Color, RenderConfig, StyleSheet, Styled},
};
use once_cell::sync::Lazy;

use crate::cli::error::ExoError;

static PROMPT_CONFIG: Lazy<RenderConfig> = Lazy::new(|| {
    let magenta = StyleSheet::default().with_fg(Color::DarkMagenta);
    let grey = StyleSheet::default().with_fg(Color::Grey);

    RenderConfig::default()
        .with_prompt_prefix(Styled::new(">").with_fg(Color::LightBlue))
        .with_selected_option(Some(magenta))
        .with_answer(grey)
        .with_help_message(grey)
});

/// Terminal prompts for the configuration wizard.
///
/// Only ever used when standard input is a terminal. Ctrl-C or Esc cancel
/// the whole command. Each prompt blocks on the terminal, so it runs on the
/// blocking pool and leaves the runtime's worker threads free.
pub(super) struct Prompt;

impl Prompt {
    pub(super) async fn bool(msg: &str, default: bool) -> Result<bool, ExoError> {
        let msg = msg.to_string();
        blocking(move || {
            Ok(Confirm::new(&msg)
                .with_default(default)
                .with_render_config(*PROMPT_CONFIG)
                .prompt()?)
        })
        .await
    }

    pub(super) async fn select(
        msg: &str,
        options: Vec<String>,
        selected: &str,
    ) -> Result<String, ExoError> {
        let msg = msg.to_string();
        let cursor = starting_cursor(&options, selected);
        blocking(move || {
            Ok(Select::new(&msg, options)
                .with_starting_cursor(cursor)
                .with_render_config(*PROMPT_CONFIG)
                .prompt()?)
        })
        .await
    }

    /// Asks until a non-empty answer is given.
    pub(super) async fn string(msg: &str) -> Result<String, ExoError> {
        let msg = msg.to_string();
        blocking(move || loop {
            let answer = Text::new(&msg)
                .with_render_config(*PROMPT_CONFIG)
                .prompt()?;
            if let Some(answer) = non_empty(&answer) {
                return Ok(answer);
            }
        })
        .await
    }

    pub(super) async fn secret(msg: &str) -> Result<String, ExoError> {
        let msg = msg.to_string();
        blocking(move || loop {
            let answer = Password::new(&msg)
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation()
                .with_render_config(*PROMPT_CONFIG)
                .prompt()?;
            if let Some(answer) = non_empty(&answer) {
                return Ok(answer);
            }
        })
        .await
    }
}

async fn blocking<T, F>(prompt: F) -> Result<T, ExoError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExoError> + Send + 'static,
{
    tokio::task::spawn_blocking(prompt).await?
}

fn starting_cursor(options: &[String], selected: &str) -> usize {
    options
        .iter()
        .position(|option| option == selected)
        .unwrap_or_default()
}

fn non_empty(answer: &str) -> Option<String> {
    let answer = answer.trim();
    (!answer.is_empty()).then(|| answer.to_string())
}
