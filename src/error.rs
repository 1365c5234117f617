//! Error taxonomy.
//!
//! Client-side protocol errors map to numeric replies and leave the
//! connection up. Peer-link violations map to an `ERROR` line and tear the
//! link down. Fatal startup errors carry their process exit code.

use thiserror::Error;

use alder_proto::{Message, Numeric};

/// A client command failure that resolves to a numeric reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("not enough parameters")]
    NeedMoreParams(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("no such server: {0}")]
    NoSuchServer(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("cannot send to channel: {0}")]
    CannotSendToChan(String),

    #[error("too many channels: {0}")]
    TooManyChannels(String),

    #[error("no text to send")]
    NoTextToSend,

    #[error("no nickname given")]
    NoNicknameGiven,

    #[error("erroneous nickname: {0}")]
    ErroneousNickname(String),

    #[error("nickname in use: {0}")]
    NicknameInUse(String),

    #[error("user {0} not in channel {1}")]
    UserNotInChannel(String, String),

    #[error("not on channel: {0}")]
    NotOnChannel(String),

    #[error("user {0} already on channel {1}")]
    UserOnChannel(String, String),

    #[error("password mismatch")]
    PasswdMismatch,

    #[error("cannot join {0} (+l)")]
    ChannelIsFull(String),

    #[error("unknown mode: {0}")]
    UnknownMode(char),

    #[error("cannot join {0} (+i)")]
    InviteOnlyChan(String),

    #[error("cannot join {0} (+b)")]
    BannedFromChan(String),

    #[error("cannot join {0} (+k)")]
    BadChannelKey(String),

    #[error("bad channel mask: {0}")]
    BadChanMask(String),

    #[error("list full: {0}")]
    BanListFull(String),

    #[error("permission denied")]
    NoPrivileges,

    #[error("chanop privileges needed: {0}")]
    ChanOpPrivsNeeded(String),

    #[error("cannot kill a server")]
    CantKillServer,

    #[error("attack denied: {0}")]
    AttackDeny(String),

    #[error("no oper block matches")]
    NoOperHost,

    #[error("cannot change modes for other users")]
    UsersDontMatch,
}

impl CommandError {
    /// Render as the numeric reply the client sees.
    pub fn to_reply(&self, server: &str, nick: &str) -> Message {
        use CommandError::*;
        match self {
            NeedMoreParams(cmd) => Numeric::ERR_NEEDMOREPARAMS.reply(
                server,
                nick,
                &[cmd, "Not enough parameters"],
            ),
            UnknownCommand(cmd) => {
                Numeric::ERR_UNKNOWNCOMMAND.reply(server, nick, &[cmd, "Unknown command"])
            }
            NotRegistered => {
                Numeric::ERR_NOTREGISTERED.reply(server, nick, &["You have not registered"])
            }
            AlreadyRegistered => {
                Numeric::ERR_ALREADYREGISTERED.reply(server, nick, &["You may not reregister"])
            }
            NoSuchNick(target) => {
                Numeric::ERR_NOSUCHNICK.reply(server, nick, &[target, "No such nick/channel"])
            }
            NoSuchServer(target) => {
                Numeric::ERR_NOSUCHSERVER.reply(server, nick, &[target, "No such server"])
            }
            NoSuchChannel(target) => {
                Numeric::ERR_NOSUCHCHANNEL.reply(server, nick, &[target, "No such channel"])
            }
            CannotSendToChan(target) => Numeric::ERR_CANNOTSENDTOCHAN.reply(
                server,
                nick,
                &[target, "Cannot send to channel"],
            ),
            TooManyChannels(target) => Numeric::ERR_TOOMANYCHANNELS.reply(
                server,
                nick,
                &[target, "You have joined too many channels"],
            ),
            NoTextToSend => Numeric::ERR_NOTEXTTOSEND.reply(server, nick, &["No text to send"]),
            NoNicknameGiven => {
                Numeric::ERR_NONICKNAMEGIVEN.reply(server, nick, &["No nickname given"])
            }
            ErroneousNickname(bad) => {
                Numeric::ERR_ERRONEUSNICKNAME.reply(server, nick, &[bad, "Erroneous Nickname"])
            }
            NicknameInUse(bad) => Numeric::ERR_NICKNAMEINUSE.reply(
                server,
                nick,
                &[bad, "Nickname is already in use."],
            ),
            UserNotInChannel(target, chan) => Numeric::ERR_USERNOTINCHANNEL.reply(
                server,
                nick,
                &[target, chan, "They aren't on that channel"],
            ),
            NotOnChannel(chan) => Numeric::ERR_NOTONCHANNEL.reply(
                server,
                nick,
                &[chan, "You're not on that channel"],
            ),
            UserOnChannel(target, chan) => Numeric::ERR_USERONCHANNEL.reply(
                server,
                nick,
                &[target, chan, "is already on channel"],
            ),
            PasswdMismatch => {
                Numeric::ERR_PASSWDMISMATCH.reply(server, nick, &["Invalid password"])
            }
            ChannelIsFull(chan) => Numeric::ERR_CHANNELISFULL.reply(
                server,
                nick,
                &[chan, "Cannot join channel (+l)"],
            ),
            UnknownMode(letter) => Numeric::ERR_UNKNOWNMODE.reply(
                server,
                nick,
                &[&letter.to_string(), "is unknown mode char to me"],
            ),
            InviteOnlyChan(chan) => Numeric::ERR_INVITEONLYCHAN.reply(
                server,
                nick,
                &[chan, "Cannot join channel (+i)"],
            ),
            BannedFromChan(chan) => Numeric::ERR_BANNEDFROMCHAN.reply(
                server,
                nick,
                &[chan, "Cannot join channel (+b)"],
            ),
            BadChannelKey(chan) => Numeric::ERR_BADCHANNELKEY.reply(
                server,
                nick,
                &[chan, "Cannot join channel (+k)"],
            ),
            BadChanMask(chan) => {
                Numeric::ERR_BADCHANMASK.reply(server, nick, &[chan, "Bad Channel Mask"])
            }
            BanListFull(chan) => Numeric::ERR_BANLISTFULL.reply(
                server,
                nick,
                &[chan, "Channel ban/ignore list is full"],
            ),
            NoPrivileges => Numeric::ERR_NOPRIVILEGES.reply(
                server,
                nick,
                &["Permission Denied - You do not have the required operator privileges"],
            ),
            ChanOpPrivsNeeded(chan) => Numeric::ERR_CHANOPRIVSNEEDED.reply(
                server,
                nick,
                &[chan, "You're not a channel operator"],
            ),
            CantKillServer => Numeric::ERR_CANTKILLSERVER.reply(
                server,
                nick,
                &["You can't kill a server!"],
            ),
            AttackDeny(target) => Numeric::ERR_ATTACKDENY.reply(
                server,
                nick,
                &[target, "Cannot kill, kick or deop a network service"],
            ),
            NoOperHost => Numeric::ERR_NOOPERHOST.reply(
                server,
                nick,
                &["Invalid oper credentials"],
            ),
            UsersDontMatch => Numeric::ERR_USERSDONTMATCH.reply(
                server,
                nick,
                &["Can't change mode for other users"],
            ),
        }
    }
}

/// A violation on a server link; the text goes out as `ERROR :<text>`
/// before the link is dropped.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("unexpected command during handshake: {0}")]
    UnexpectedCommand(String),

    #[error("server {0} is not in any link block")]
    UnknownServer(String),

    #[error("invalid credentials for {0}")]
    BadPassword(String),

    #[error("server ID {0} is already in use")]
    DuplicateSid(String),

    #[error("server name {0} is already in use")]
    DuplicateName(String),

    #[error("CAPAB mismatch: {0}")]
    CapabMismatch(String),

    #[error("clock skew of {0} seconds exceeds the permitted window")]
    ClockSkew(i64),

    #[error("malformed {0} from peer")]
    Malformed(&'static str),

    #[error("remote error: {0}")]
    Remote(String),
}

/// Process exit codes for the daemon binary.
pub mod exit {
    pub const OK: i32 = 0;
    pub const DIE: i32 = 1;
    pub const CONFIG: i32 = 4;
    pub const LOG: i32 = 5;
    pub const FORK: i32 = 6;
    pub const NO_PORTS: i32 = 8;
    pub const PID_FILE: i32 = 9;
    pub const ROOT: i32 = 11;
    pub const DIE_TAG: i32 = 12;
    pub const MODULE: i32 = 13;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_need_more_params_reply() {
        let m = CommandError::NeedMoreParams("JOIN".into()).to_reply("srv.net", "alice");
        assert_eq!(m.to_string(), ":srv.net 461 alice JOIN :Not enough parameters");
    }

    #[test]
    fn test_reregister_reply() {
        let m = CommandError::AlreadyRegistered.to_reply("srv.net", "alice");
        assert_eq!(m.to_string(), ":srv.net 462 alice :You may not reregister");
    }

    #[test]
    fn test_ban_list_full_reply() {
        let m = CommandError::BanListFull("#c".into()).to_reply("srv.net", "bob");
        assert_eq!(
            m.to_string(),
            ":srv.net 478 bob #c :Channel ban/ignore list is full"
        );
    }
}
