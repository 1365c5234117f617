//! The numeric-reply catalog.
//!
//! Three-digit reply codes sent with the recipient's nickname as the first
//! parameter. Only the numerics this daemon actually emits are listed.

#![allow(non_camel_case_types)]

use crate::message::Message;

/// IRC numeric reply code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Numeric {
    // Connection registration
    RPL_WELCOME = 1,
    RPL_YOURHOST = 2,
    RPL_CREATED = 3,
    RPL_MYINFO = 4,
    RPL_ISUPPORT = 5,

    // Command replies
    RPL_UMODEIS = 221,
    RPL_LUSERCLIENT = 251,
    RPL_LUSEROP = 252,
    RPL_LUSERUNKNOWN = 253,
    RPL_LUSERCHANNELS = 254,
    RPL_LUSERME = 255,
    RPL_ADMINME = 256,
    RPL_ADMINLOC1 = 257,
    RPL_ADMINLOC2 = 258,
    RPL_ADMINEMAIL = 259,
    RPL_LOCALUSERS = 265,
    RPL_GLOBALUSERS = 266,
    RPL_AWAY = 301,
    RPL_USERHOST = 302,
    RPL_ISON = 303,
    RPL_UNAWAY = 305,
    RPL_NOWAWAY = 306,
    RPL_WHOISUSER = 311,
    RPL_WHOISSERVER = 312,
    RPL_WHOISOPERATOR = 313,
    RPL_ENDOFWHO = 315,
    RPL_WHOISIDLE = 317,
    RPL_ENDOFWHOIS = 318,
    RPL_WHOISCHANNELS = 319,
    RPL_LISTSTART = 321,
    RPL_LIST = 322,
    RPL_LISTEND = 323,
    RPL_CHANNELMODEIS = 324,
    RPL_CREATIONTIME = 329,
    RPL_NOTOPIC = 331,
    RPL_TOPIC = 332,
    RPL_TOPICWHOTIME = 333,
    RPL_INVITING = 341,
    RPL_VERSION = 351,
    RPL_WHOREPLY = 352,
    RPL_NAMREPLY = 353,
    RPL_ENDOFNAMES = 366,
    RPL_BANLIST = 367,
    RPL_ENDOFBANLIST = 368,
    RPL_INFO = 371,
    RPL_MOTD = 372,
    RPL_ENDOFINFO = 374,
    RPL_MOTDSTART = 375,
    RPL_ENDOFMOTD = 376,
    RPL_YOUAREOPER = 381,
    RPL_REHASHING = 382,
    RPL_TIME = 391,
    RPL_HOSTHIDDEN = 396,
    RPL_ENDOFSTATS = 219,
    RPL_STATSUPTIME = 242,

    // Errors
    ERR_NOSUCHNICK = 401,
    ERR_NOSUCHSERVER = 402,
    ERR_NOSUCHCHANNEL = 403,
    ERR_CANNOTSENDTOCHAN = 404,
    ERR_TOOMANYCHANNELS = 405,
    ERR_NOTEXTTOSEND = 412,
    ERR_UNKNOWNCOMMAND = 421,
    ERR_NOMOTD = 422,
    ERR_NONICKNAMEGIVEN = 431,
    ERR_ERRONEUSNICKNAME = 432,
    ERR_NICKNAMEINUSE = 433,
    ERR_NICKCOLLISION = 436,
    ERR_USERNOTINCHANNEL = 441,
    ERR_NOTONCHANNEL = 442,
    ERR_USERONCHANNEL = 443,
    ERR_NOTREGISTERED = 451,
    ERR_NEEDMOREPARAMS = 461,
    ERR_ALREADYREGISTERED = 462,
    ERR_PASSWDMISMATCH = 464,
    ERR_CHANNELISFULL = 471,
    ERR_UNKNOWNMODE = 472,
    ERR_INVITEONLYCHAN = 473,
    ERR_BANNEDFROMCHAN = 474,
    ERR_BADCHANNELKEY = 475,
    ERR_BADCHANMASK = 476,
    ERR_BANLISTFULL = 478,
    ERR_NOPRIVILEGES = 481,
    ERR_CHANOPRIVSNEEDED = 482,
    ERR_CANTKILLSERVER = 483,
    ERR_ATTACKDENY = 484,
    ERR_NOOPERHOST = 491,
    ERR_USERSDONTMATCH = 502,
}

impl Numeric {
    /// The three-digit wire form, zero-padded.
    pub fn code(self) -> String {
        format!("{:03}", self as u16)
    }

    /// Build the reply message: `:<server> <code> <nick> <params…>`.
    ///
    /// `nick` is the recipient as currently known; `*` for unregistered
    /// connections.
    pub fn reply(self, server: &str, nick: &str, params: &[&str]) -> Message {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(nick.to_string());
        all.extend(params.iter().map(|p| p.to_string()));
        Message::with_prefix(server, &self.code(), all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_zero_padded() {
        assert_eq!(Numeric::RPL_WELCOME.code(), "001");
        assert_eq!(Numeric::RPL_UMODEIS.code(), "221");
        assert_eq!(Numeric::ERR_NEEDMOREPARAMS.code(), "461");
    }

    #[test]
    fn test_reply_shape() {
        let m = Numeric::ERR_NEEDMOREPARAMS.reply(
            "hub.example.net",
            "alice",
            &["JOIN", "Not enough parameters"],
        );
        assert_eq!(
            m.to_string(),
            ":hub.example.net 461 alice JOIN :Not enough parameters"
        );
    }

    #[test]
    fn test_reply_unregistered_star() {
        let m = Numeric::ERR_NOTREGISTERED.reply("s", "*", &["You have not registered"]);
        assert_eq!(m.to_string(), ":s 451 * :You have not registered");
    }
}
