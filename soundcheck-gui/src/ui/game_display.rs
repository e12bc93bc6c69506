//! # Game Display Module
//!
//! Layout of the single game screen: mistakes counter, current guess,
//! replay control, hint row, recent attempts and audio status.

use iced::widget::{Space, button, column, container, row, text};
use iced::{Alignment, Color, Element, Length};

use soundcheck_core::{Feedback, Phase};

use crate::{AudioStatus, GameDisplayData, Message};

const HINT_COLOR: Color = Color::from_rgb(0.95, 0.75, 0.3);
const MUTED_COLOR: Color = Color::from_rgb(0.6, 0.6, 0.6);

/// Creates the complete game view
pub fn create_game_view(data: &GameDisplayData) -> Element<'static, Message> {
    let title = text("Sound Check").size(28);

    let content = column![
        title,
        Space::with_height(20),
        create_status_panel(data),
        Space::with_height(10),
        create_guess_panel(data),
        Space::with_height(10),
        create_hint_row(data),
        Space::with_height(20),
        create_history_panel(data),
        Space::with_height(Length::Fill),
        create_audio_status(&data.audio_status),
    ]
    .align_x(Alignment::Center)
    .spacing(5)
    .padding(20);

    container(content)
        .width(Length::Fill)
        .height(Length::Fill)
        .center_x(Length::Fill)
        .into()
}

/// What the player should be doing right now.
fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "Get ready...",
        Phase::Playing { .. } => "Listen...",
        Phase::Listening => "Sing the note!",
    }
}

/// Mistakes counter text, hidden while there are none.
pub fn mistakes_label(mistake_count: u32) -> Option<String> {
    match mistake_count {
        0 => None,
        1 => Some("1 mistake".to_string()),
        n => Some(format!("{} mistakes", n)),
    }
}

/// Recent attempts as a single line, newest first.
pub fn history_label(history: &[u32]) -> String {
    if history.is_empty() {
        return "No rounds finished yet".to_string();
    }
    history
        .iter()
        .map(|mistakes| mistakes.to_string())
        .collect::<Vec<_>>()
        .join("  ")
}

fn create_status_panel(data: &GameDisplayData) -> Element<'static, Message> {
    let snapshot = &data.snapshot;
    let mut status = column![text(phase_label(snapshot.phase)).size(18)]
        .align_x(Alignment::Center)
        .spacing(5);

    if let Some(label) = mistakes_label(snapshot.mistake_count) {
        status = status.push(text(label).size(16));
    }
    status.into()
}

fn create_guess_panel(data: &GameDisplayData) -> Element<'static, Message> {
    let guess = if data.snapshot.guess_name.is_empty() {
        "--".to_string()
    } else {
        data.snapshot.guess_name.clone()
    };

    let replay = button(text("Replay sound").size(14))
        .padding([6, 10])
        .on_press(Message::Replay);

    container(
        column![
            text("Your note").size(14),
            text(guess).size(48),
            Space::with_height(10),
            replay,
        ]
        .align_x(Alignment::Center)
        .spacing(5),
    )
    .padding(15)
    .into()
}

/// The hint button appears once there is something to hint at; pressing it
/// reveals the too high / too low feedback.
fn create_hint_row(data: &GameDisplayData) -> Element<'static, Message> {
    let feedback = data.snapshot.feedback;
    if feedback == Feedback::None {
        return Space::with_height(30).into();
    }

    if data.hint_visible {
        text(feedback.to_string())
            .size(20)
            .color(HINT_COLOR)
            .into()
    } else {
        row![
            button(text("Show hint").size(14))
                .padding([6, 10])
                .on_press(Message::ShowHint)
        ]
        .align_y(Alignment::Center)
        .into()
    }
}

fn create_history_panel(data: &GameDisplayData) -> Element<'static, Message> {
    container(
        column![
            text("Mistakes in recent rounds").size(14),
            text(history_label(&data.snapshot.history)).size(16),
        ]
        .align_x(Alignment::Center)
        .spacing(5),
    )
    .padding(10)
    .into()
}

fn create_audio_status(status: &AudioStatus) -> Element<'static, Message> {
    let label = match status {
        AudioStatus::Running => "Audio running".to_string(),
        AudioStatus::InputOnly => "Listening only: no audio output for the target note".to_string(),
        AudioStatus::Unavailable(reason) => format!("No audio: {}", reason),
    };
    text(label).size(12).color(MUTED_COLOR).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mistakes_label_hidden_at_zero() {
        assert_eq!(mistakes_label(0), None);
        assert_eq!(mistakes_label(1).as_deref(), Some("1 mistake"));
        assert_eq!(mistakes_label(4).as_deref(), Some("4 mistakes"));
    }

    #[test]
    fn test_history_label() {
        assert_eq!(history_label(&[]), "No rounds finished yet");
        assert_eq!(history_label(&[3, 0, 12]), "3  0  12");
    }
}
