// src/lane_group.rs - C4: redundant-lane bookkeeping for one toolhead (spec §4.4)
use crate::config::LaneGroupConfig;

/// C4. An ordered list of `(feeder, bay)` members feeding the same
/// extruder. Every operation is a read-only snapshot over caller-supplied
/// predicates (spec §4.4: "no mutation") - which bay is currently loaded
/// and which are available is derived live from feeder state each call,
/// never cached here.
pub struct LaneGroup {
    name: String,
    members: Vec<(String, u8)>,
}

impl LaneGroup {
    pub fn new(name: impl Into<String>, members: Vec<(String, u8)>) -> Self {
        Self { name: name.into(), members }
    }

    pub fn from_config(name: impl Into<String>, config: &LaneGroupConfig) -> Result<Self, crate::config::ConfigError> {
        let name = name.into();
        let members = config
            .members
            .iter()
            .map(|token| crate::config::parse_member_token(&name, token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(name, members))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[(String, u8)] {
        &self.members
    }

    /// The member currently loaded, per `is_loaded`.
    pub fn get_loaded<F>(&self, is_loaded: F) -> Option<&(String, u8)>
    where
        F: Fn(&(String, u8)) -> bool,
    {
        self.members.iter().find(|m| is_loaded(m))
    }

    /// All members `is_available` reports true for, in configured order.
    pub fn get_available<F>(&self, is_available: F) -> Vec<&(String, u8)>
    where
        F: Fn(&(String, u8)) -> bool,
    {
        self.members.iter().filter(|m| is_available(m)).collect()
    }

    /// The first available member in configured order (spec §4.4).
    pub fn get_next_available<F>(&self, is_available: F) -> Option<&(String, u8)>
    where
        F: Fn(&(String, u8)) -> bool,
    {
        self.members.iter().find(|m| is_available(m))
    }
}
