//! Out-of-band pairing hand-off

use qrcode::QrCode;
use qrcode::render::unicode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A code a human must approve to authorize a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    /// Challenge payload, passed through verbatim.
    pub code: String,
}

impl PairingChallenge {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Renders pairing challenges for a human. Fire-and-forget.
///
/// Implementations must not panic; rendering failures are theirs to log.
pub trait PairingPresenter: Send + Sync {
    fn present(&self, challenge: &PairingChallenge);
}

/// Writes challenges to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl PairingPresenter for LogPresenter {
    fn present(&self, challenge: &PairingChallenge) {
        info!(code = %challenge.code, "Pairing required: approve this code on your phone (Linked Devices)");
    }
}

/// Prints challenges to the terminal as a scannable QR code with linking instructions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPresenter;

impl TerminalPresenter {
    fn render(challenge: &PairingChallenge) -> String {
        let code = match QrCode::new(challenge.code.as_bytes()) {
            // Inverted so the code reads on dark terminal backgrounds
            Ok(qr) => qr
                .render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Light)
                .light_color(unicode::Dense1x2::Dark)
                .build(),
            Err(e) => {
                warn!(error = %e, "Pairing code does not fit a QR code, printing it as text");
                format!("    {}", challenge.code)
            }
        };
        format!(
            "\nScan this code from your phone (Settings > Linked Devices):\n\n{}\n",
            code
        )
    }
}

impl PairingPresenter for TerminalPresenter {
    fn present(&self, challenge: &PairingChallenge) {
        println!("{}", Self::render(challenge));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_render_draws_qr_code() {
        let rendered = TerminalPresenter::render(&PairingChallenge::new(
            "2@Xk1sPq9v,Yz0mN8bA4cD/eF==,GhIjKlMnOp+Q=,RsTuVwXyZ1=",
        ));
        assert!(rendered.contains("Linked Devices"));
        assert!(rendered.chars().any(|c| matches!(c, '█' | '▀' | '▄')));
        assert!(!rendered.contains("2@Xk1sPq9v"));
    }

    #[test]
    fn terminal_render_falls_back_to_text_when_too_long() {
        let code = "x".repeat(8000);
        let rendered = TerminalPresenter::render(&PairingChallenge::new(code.clone()));
        assert!(rendered.contains(&code));
    }

    #[test]
    fn presenters_are_object_safe() {
        let presenters: Vec<Box<dyn PairingPresenter>> =
            vec![Box::new(LogPresenter), Box::new(TerminalPresenter)];
        assert_eq!(presenters.len(), 2);
    }
}
