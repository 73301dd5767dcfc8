//! Classification and decoding of the lines sent by the server.
//!
//! The reader task only classifies: asynchronous events (`message`, `eject:`,
//! `dead`) are routed to the event queue, everything else is forwarded
//! verbatim as the response to the outstanding command. Payload
//! interpretation happens on the caller's side.

use std::str::FromStr;

use crate::api::error::{ClientError, Result};

/// A resource that can sit on a tile or in an inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Food,
    Linemate,
    Deraumere,
    Sibur,
    Mendiane,
    Phiras,
    Thystame,
}

impl Resource {
    /// Every resource, in wire order.
    pub const ALL: [Resource; 7] = [
        Resource::Food,
        Resource::Linemate,
        Resource::Deraumere,
        Resource::Sibur,
        Resource::Mendiane,
        Resource::Phiras,
        Resource::Thystame,
    ];

    /// The six elevation stones, in the canonical drop order.
    pub const STONES: [Resource; 6] = [
        Resource::Linemate,
        Resource::Deraumere,
        Resource::Sibur,
        Resource::Mendiane,
        Resource::Phiras,
        Resource::Thystame,
    ];

    /// Returns the name of the resource as it appears on the wire.
    pub const fn name(self) -> &'static str {
        match self {
            Resource::Food => "food",
            Resource::Linemate => "linemate",
            Resource::Deraumere => "deraumere",
            Resource::Sibur => "sibur",
            Resource::Mendiane => "mendiane",
            Resource::Phiras => "phiras",
            Resource::Thystame => "thystame",
        }
    }

    pub fn from_name(name: &str) -> Option<Resource> {
        Resource::ALL.into_iter().find(|r| r.name() == name)
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Phiras and thystame are scarce enough to always be worth a detour.
    pub const fn is_rare(self) -> bool {
        matches!(self, Resource::Phiras | Resource::Thystame)
    }
}

/// A count per resource, used both for inventories and for tile contents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Inventory([u32; 7]);

impl Inventory {
    pub fn count(&self, resource: Resource) -> u32 {
        self.0[resource.index()]
    }

    pub fn set_count(&mut self, resource: Resource, count: u32) {
        self.0[resource.index()] = count;
    }

    pub fn add(&mut self, resource: Resource, count: u32) {
        self.0[resource.index()] += count;
    }

    pub fn food(&self) -> u32 {
        self.count(Resource::Food)
    }
}

/// Parses the bracketed inventory form, e.g. `[food 10, linemate 2]`.
///
/// The last whitespace-separated field of each entry is the count, the prefix
/// is the resource name. Absent resources read as zero.
pub fn parse_inventory(s: &str) -> Result<Inventory> {
    let inner = strip_brackets(s)?;
    let mut inventory = Inventory::default();

    for entry in inner.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, count) = entry
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| ClientError::Parse(format!("invalid inventory entry: {entry:?}")))?;
        let resource = Resource::from_name(name.trim())
            .ok_or_else(|| ClientError::Parse(format!("unknown resource name: {name:?}")))?;
        let count: u32 = count
            .parse()
            .map_err(|_| ClientError::Parse(format!("invalid count in entry: {entry:?}")))?;
        inventory.set_count(resource, count);
    }

    Ok(inventory)
}

/// The content of one visible tile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Number of `player` tokens; tile 0 includes the agent itself.
    pub players: u32,
    /// Number of `egg` tokens.
    pub eggs: u32,
    /// Resources lying on the tile.
    pub items: Inventory,
}

impl Tile {
    pub fn count(&self, resource: Resource) -> u32 {
        self.items.count(resource)
    }

    pub fn has(&self, resource: Resource) -> bool {
        self.count(resource) > 0
    }

    /// Total number of elevation stones on the tile.
    pub fn stone_count(&self) -> u32 {
        Resource::STONES.iter().map(|&s| self.count(s)).sum()
    }
}

impl FromStr for Tile {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let mut tile = Tile::default();

        for token in s.split_ascii_whitespace() {
            match token {
                "player" => tile.players += 1,
                "egg" => tile.eggs += 1,
                other => match Resource::from_name(other) {
                    Some(resource) => tile.items.add(resource, 1),
                    None => {
                        return Err(ClientError::Parse(format!("unknown tile token: {other:?}")));
                    }
                },
            }
        }

        Ok(tile)
    }
}

/// Parses a `Look` response into the ordered tile list; tile 0 is the
/// agent's own tile.
pub fn parse_tiles(s: &str) -> Result<Vec<Tile>> {
    strip_brackets(s)?.split(',').map(Tile::from_str).collect()
}

fn strip_brackets(s: &str) -> Result<&str> {
    s.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ClientError::Parse(format!("expected a bracketed list, got {s:?}")))
}

/// An asynchronous event pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A broadcast heard from the given direction (0 = same tile, 1-8 =
    /// compass-relative). Surrounding double quotes are already stripped.
    Broadcast { direction: u8, text: String },
    /// Another player's `Eject` pushed us one tile.
    Ejected { direction: u8 },
    /// The agent starved; further commands are meaningless.
    Dead,
}

/// An inbound line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Event(Event),
    Response(String),
}

/// Classifies one line received from the server.
///
/// Anything that is not a known event shape is a response to the outstanding
/// command and is forwarded untouched.
pub fn classify(line: &str) -> Result<Inbound> {
    if let Some(rest) = line.strip_prefix("message ") {
        let (direction, text) = rest
            .split_once(',')
            .ok_or_else(|| ClientError::Parse(format!("broadcast without direction: {line:?}")))?;
        let direction = parse_direction(direction)?;
        let text = text.trim_start();
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(text);
        return Ok(Inbound::Event(Event::Broadcast {
            direction,
            text: text.to_owned(),
        }));
    }

    if let Some(rest) = line.strip_prefix("eject:") {
        let direction = parse_direction(rest)?;
        return Ok(Inbound::Event(Event::Ejected { direction }));
    }

    if line == "dead" {
        return Ok(Inbound::Event(Event::Dead));
    }

    Ok(Inbound::Response(line.to_owned()))
}

fn parse_direction(s: &str) -> Result<u8> {
    let direction: u8 = s
        .trim()
        .parse()
        .map_err(|_| ClientError::Parse(format!("invalid direction: {s:?}")))?;
    if direction > 8 {
        return Err(ClientError::Parse(format!(
            "direction out of range: {direction}"
        )));
    }
    Ok(direction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_inventory(inventory: &Inventory) -> String {
        let entries: Vec<String> = Resource::ALL
            .iter()
            .map(|&r| format!("{} {}", r.name(), inventory.count(r)))
            .collect();
        format!("[{}]", entries.join(", "))
    }

    fn format_tiles(tiles: &[Tile]) -> String {
        let entries: Vec<String> = tiles
            .iter()
            .map(|tile| {
                let mut tokens = Vec::new();
                for _ in 0..tile.players {
                    tokens.push("player");
                }
                for _ in 0..tile.eggs {
                    tokens.push("egg");
                }
                for resource in Resource::ALL {
                    for _ in 0..tile.count(resource) {
                        tokens.push(resource.name());
                    }
                }
                tokens.join(" ")
            })
            .collect();
        format!("[{}]", entries.join(","))
    }

    #[test]
    fn inventory_parses_counts() {
        let inventory = parse_inventory("[food 10, linemate 2, thystame 0]").unwrap();
        assert_eq!(inventory.food(), 10);
        assert_eq!(inventory.count(Resource::Linemate), 2);
        assert_eq!(inventory.count(Resource::Sibur), 0);
    }

    #[test]
    fn inventory_round_trips() {
        let mut inventory = Inventory::default();
        inventory.set_count(Resource::Food, 7);
        inventory.set_count(Resource::Deraumere, 3);
        inventory.set_count(Resource::Thystame, 1);
        let reparsed = parse_inventory(&format_inventory(&inventory)).unwrap();
        assert_eq!(reparsed, inventory);
    }

    #[test]
    fn inventory_rejects_garbage() {
        assert!(parse_inventory("food 10").is_err());
        assert!(parse_inventory("[food ten]").is_err());
        assert!(parse_inventory("[gold 3]").is_err());
    }

    #[test]
    fn look_parses_tiles() {
        let tiles = parse_tiles("[player linemate,,food food, egg player]").unwrap();
        assert_eq!(tiles.len(), 4);
        assert_eq!(tiles[0].players, 1);
        assert!(tiles[0].has(Resource::Linemate));
        assert_eq!(tiles[1], Tile::default());
        assert_eq!(tiles[2].count(Resource::Food), 2);
        assert_eq!(tiles[3].eggs, 1);
        assert_eq!(tiles[3].players, 1);
    }

    #[test]
    fn look_round_trips() {
        let mut occupied = Tile::default();
        occupied.players = 2;
        occupied.items.add(Resource::Linemate, 1);
        occupied.items.add(Resource::Phiras, 2);
        let tiles = vec![occupied, Tile::default(), occupied];
        let reparsed = parse_tiles(&format_tiles(&tiles)).unwrap();
        assert_eq!(reparsed, tiles);
    }

    #[test]
    fn look_rejects_unknown_tokens() {
        assert!(parse_tiles("[player, dragon]").is_err());
    }

    #[test]
    fn classifies_broadcasts() {
        let inbound = classify("message 3, \"hello there\"").unwrap();
        assert_eq!(
            inbound,
            Inbound::Event(Event::Broadcast {
                direction: 3,
                text: "hello there".to_owned(),
            })
        );
    }

    #[test]
    fn classifies_unquoted_broadcasts() {
        let inbound = classify("message 0, ping").unwrap();
        assert_eq!(
            inbound,
            Inbound::Event(Event::Broadcast {
                direction: 0,
                text: "ping".to_owned(),
            })
        );
    }

    #[test]
    fn classifies_ejections_and_death() {
        assert_eq!(
            classify("eject: 5").unwrap(),
            Inbound::Event(Event::Ejected { direction: 5 })
        );
        assert_eq!(classify("dead").unwrap(), Inbound::Event(Event::Dead));
    }

    #[test]
    fn forwards_responses_verbatim() {
        assert_eq!(
            classify("Elevation underway").unwrap(),
            Inbound::Response("Elevation underway".to_owned())
        );
        assert_eq!(classify("ok").unwrap(), Inbound::Response("ok".to_owned()));
        assert_eq!(
            classify("[food 3]").unwrap(),
            Inbound::Response("[food 3]".to_owned())
        );
    }

    #[test]
    fn rejects_bad_directions() {
        assert!(classify("message 9, hi").is_err());
        assert!(classify("eject: x").is_err());
    }
}
