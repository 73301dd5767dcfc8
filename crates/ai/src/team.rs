//! Grammar of the broadcasts exchanged between teammates.
//!
//! Every coordination payload starts with `[<team_name>]` so that foreign
//! broadcasts can be discarded without inspection. Sender ids let an agent
//! ignore its own echoes.

/// A decoded teammate broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamMessage {
    /// A newcomer asking whether a survivor already exists.
    RoleCheck { sender: String },
    /// The survivor answering a role check.
    SurvivorExists { sender: String },
    /// A leveler asking `need` same-level peers to join its ritual site.
    ElevationRequest {
        from_level: u32,
        to_level: u32,
        need: u32,
        sender: String,
    },
    /// A peer announcing it is on its way to a ritual site.
    JoinResponse { to: String, from: String },
}

pub fn format_role_check(team: &str, id: &str) -> String {
    format!("[{team}]ROLE_CHECK_SURVIVOR_EXISTS_FROM_{id}")
}

pub fn format_survivor_exists(team: &str, id: &str) -> String {
    format!("[{team}]SURVIVOR_EXISTS_FROM_{id}")
}

pub fn format_elevation_request(team: &str, from_level: u32, need: u32, id: &str) -> String {
    format!(
        "[{team}]ELEV_FROM_L{from_level}_TO_L{}_NEED_{need}_ID{id}",
        from_level + 1
    )
}

pub fn format_join_response(team: &str, to: &str, from: &str) -> String {
    format!("[{team}]RESP_JOINING_TO_{to}_FROM_{from}")
}

/// Decodes a broadcast payload scoped to `team`.
///
/// Returns `None` for foreign-team broadcasts and for payloads that do not
/// match any known shape.
pub fn parse(team: &str, text: &str) -> Option<TeamMessage> {
    let text = text.trim();
    let payload = text
        .strip_prefix('[')?
        .strip_prefix(team)?
        .strip_prefix(']')?;

    if let Some(sender) = payload.strip_prefix("ROLE_CHECK_SURVIVOR_EXISTS_FROM_") {
        return Some(TeamMessage::RoleCheck {
            sender: sender.to_owned(),
        });
    }

    if let Some(sender) = payload.strip_prefix("SURVIVOR_EXISTS_FROM_") {
        return Some(TeamMessage::SurvivorExists {
            sender: sender.to_owned(),
        });
    }

    if let Some(rest) = payload.strip_prefix("ELEV_FROM_L") {
        // <from>_TO_L<to>_NEED_<k>_ID<id>
        let (from_level, rest) = rest.split_once("_TO_L")?;
        let (to_level, rest) = rest.split_once("_NEED_")?;
        let (need, sender) = rest.split_once("_ID")?;
        return Some(TeamMessage::ElevationRequest {
            from_level: from_level.parse().ok()?,
            to_level: to_level.parse().ok()?,
            need: need.parse().ok()?,
            sender: sender.to_owned(),
        });
    }

    if let Some(rest) = payload.strip_prefix("RESP_JOINING_TO_") {
        let (to, from) = rest.split_once("_FROM_")?;
        return Some(TeamMessage::JoinResponse {
            to: to.to_owned(),
            from: from.to_owned(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_check_round_trips() {
        let wire = format_role_check("red", "a1b2c3d4");
        assert_eq!(wire, "[red]ROLE_CHECK_SURVIVOR_EXISTS_FROM_a1b2c3d4");
        assert_eq!(
            parse("red", &wire),
            Some(TeamMessage::RoleCheck {
                sender: "a1b2c3d4".to_owned()
            })
        );
    }

    #[test]
    fn survivor_reply_round_trips() {
        let wire = format_survivor_exists("red", "deadbeef");
        assert_eq!(
            parse("red", &wire),
            Some(TeamMessage::SurvivorExists {
                sender: "deadbeef".to_owned()
            })
        );
    }

    #[test]
    fn elevation_request_round_trips() {
        let wire = format_elevation_request("red", 2, 1, "abc");
        assert_eq!(wire, "[red]ELEV_FROM_L2_TO_L3_NEED_1_IDabc");
        assert_eq!(
            parse("red", &wire),
            Some(TeamMessage::ElevationRequest {
                from_level: 2,
                to_level: 3,
                need: 1,
                sender: "abc".to_owned()
            })
        );
    }

    #[test]
    fn join_response_round_trips() {
        let wire = format_join_response("red", "abc", "def");
        assert_eq!(
            parse("red", &wire),
            Some(TeamMessage::JoinResponse {
                to: "abc".to_owned(),
                from: "def".to_owned()
            })
        );
    }

    #[test]
    fn foreign_teams_are_ignored() {
        let wire = format_role_check("blue", "abc");
        assert_eq!(parse("red", &wire), None);
        assert_eq!(parse("red", "no prefix at all"), None);
    }

    #[test]
    fn unknown_payloads_are_ignored() {
        assert_eq!(parse("red", "[red]SOMETHING_ELSE"), None);
        assert_eq!(parse("red", "[red]ELEV_FROM_Lx_TO_L3_NEED_1_IDa"), None);
    }
}
