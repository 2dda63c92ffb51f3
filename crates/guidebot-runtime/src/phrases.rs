//! Fixed phrases spoken by the robot.

/// Acknowledgement spoken before reasoning starts.
pub const ACK: &str = "はい";

/// Generic apology for any failure inside the reasoning loop.
pub const ERROR: &str = "申し訳ございません、エラーが発生しました。もう一度お試しください。";

/// A single model call exceeded its timeout.
pub const TIMEOUT: &str = "少々お待ちください、処理に時間がかかっております。";

/// The reasoning loop ran out of iterations.
pub const PLEASE_WAIT: &str = "申し訳ございません。少々お待ちください。";

/// The model finished without saying anything.
pub const COMPLETION: &str = "ご案内が完了しました。他にお手伝いできることはありますか？";

pub const GREETING: &str = "いらっしゃいませ！何かお探しですか？";

pub const RETURNING_HOME: &str = "かしこまりました。ホームに戻りますね。";

pub const NAV_RETRY: &str = "道がふさがっているようです。もう一度試しますね。";

pub const NAV_GIVE_UP: &str = "申し訳ございません、目的地に到着できませんでした。";

pub const PAUSED: &str = "かしこまりました。少々お待ちください。";

/// Return-to-base commands recognised in any utterance.
pub const RETURN_KEYWORDS: &[&str] = &["戻って", "帰って", "もういい", "ホームに戻って", "go back", "回去吧"];

/// Spoken before a `navigate` the model did not announce itself.
pub fn guiding_to(location: &str) -> String {
    format!("{location}売り場にご案内しますね。")
}

/// Default arrival announcement.
pub fn arrived_at(location: &str) -> String {
    if location.ends_with("コーナー") {
        format!("{location}にお連れしました。")
    } else {
        format!("{location}コーナーにお連れしました。")
    }
}

/// Default patrol promotion for a stop without a configured message.
pub fn patrol_promo(location: &str) -> String {
    format!("こちらは{location}コーナーです。ぜひご覧ください。")
}

/// `true` when `text` asks the robot to go home.
pub fn is_return_command(text: &str) -> bool {
    let lowered = text.to_lowercase();
    RETURN_KEYWORDS.iter().any(|k| lowered.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_phrase_avoids_double_corner() {
        assert_eq!(arrived_at("靴下"), "靴下コーナーにお連れしました。");
        assert_eq!(arrived_at("靴下コーナー"), "靴下コーナーにお連れしました。");
    }

    #[test]
    fn return_commands_match_case_insensitively() {
        assert!(is_return_command("もういいよ"));
        assert!(is_return_command("Please GO BACK now"));
        assert!(!is_return_command("靴下はどこ？"));
    }
}
