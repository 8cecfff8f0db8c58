//! Acoustic command interpreter.
//!
//! Every recognized command is security-gated to unicast delivery: a
//! payload carried in a broadcast frame is never interpreted, regardless
//! of content.

use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reboot,
    ArmOta,
    Ping,
    ModuleList,
    Calibrate,
}

/// Interprets a received acoustic payload. Returns `None` for broadcast
/// deliveries and for anything that isn't an exact-match of one of the
/// five recognized commands: matching is case-sensitive and exact on the
/// full payload.
pub fn interpret(payload: &[u8], is_broadcast: bool) -> Option<Command> {
    if is_broadcast {
        return None;
    }
    match payload {
        b"USMRT" => Some(Command::Reboot),
        b"USOTA" => Some(Command::ArmOta),
        b"USPNG" => Some(Command::Ping),
        b"USMOD" => Some(Command::ModuleList),
        b"USCALDO" => Some(Command::Calibrate),
        _ => None,
    }
}

/// Renders `UAxxxB<volt>VREV:<revision>` where `xxx` is the zero-padded
/// three-digit modem address.
pub fn alive_broadcast(addr: u8, volt_mv: u16, revision: &str) -> String<64> {
    use core::fmt::Write;
    let mut s = String::new();
    let _ = write!(s, "UA{addr:03}B{volt_mv}VREV:{revision}");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_never_interpreted_as_command() {
        assert_eq!(interpret(b"USMRT", true), None);
        assert_eq!(interpret(b"USOTA", true), None);
    }

    #[test]
    fn unicast_commands_recognized_exactly() {
        assert_eq!(interpret(b"USMRT", false), Some(Command::Reboot));
        assert_eq!(interpret(b"USOTA", false), Some(Command::ArmOta));
        assert_eq!(interpret(b"USPNG", false), Some(Command::Ping));
        assert_eq!(interpret(b"USMOD", false), Some(Command::ModuleList));
        assert_eq!(interpret(b"USCALDO", false), Some(Command::Calibrate));
    }

    #[test]
    fn non_exact_match_is_not_a_command() {
        assert_eq!(interpret(b"USMRTX", false), None);
        assert_eq!(interpret(b"usmrt", false), None);
    }

    #[test]
    fn alive_broadcast_pads_address_to_three_digits() {
        let s = alive_broadcast(7, 3300, "1.2.3");
        assert_eq!(s.as_str(), "UA007B3300VREV:1.2.3");
    }
}
