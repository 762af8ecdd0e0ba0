use serde::Deserialize;

/// One segment of the staged concurrency profile.
///
/// Part of the engine's CLI contract: the supervisor passes each stage as a
/// `--stage users:ramp:duration[:label]` flag, so the flag syntax lives here
/// next to the type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stage {
    /// Target number of concurrent simulated users.
    pub users: u32,
    /// How many users may be started per second while ramping toward the target.
    pub ramp: u32,
    /// How long the stage lasts once entered.
    pub duration_secs: u64,
    pub label: String,
}

impl Stage {
    pub fn new(users: u32, ramp: u32, duration_secs: u64, label: impl Into<String>) -> Self {
        Self {
            users,
            ramp,
            duration_secs,
            label: label.into(),
        }
    }

    /// Render this stage as a `--stage` flag value.
    pub fn flag_value(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.users, self.ramp, self.duration_secs, self.label
        )
    }

    /// Parse a `--stage` flag value. The label is optional and may itself
    /// contain colons.
    pub fn parse_flag(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(4, ':');

        let users = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| "No user count specified for stage".to_string())?;
        let ramp = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| "No ramp rate specified for stage".to_string())?;
        let duration_secs = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| "No duration specified for stage".to_string())?;
        let label = parts
            .next()
            .map(|p| p.to_string())
            .unwrap_or_else(|| format!("Palier -> {users} utilisateurs"));

        Ok(Self {
            users,
            ramp,
            duration_secs,
            label,
        })
    }
}

/// The default staircase: five levels of 30 seconds each.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(1, 1, 30, "Palier 1 ->   1 utilisateur"),
        Stage::new(20, 5, 30, "Palier 2 ->  20 utilisateurs"),
        Stage::new(50, 10, 30, "Palier 3 ->  50 utilisateurs"),
        Stage::new(100, 20, 30, "Palier 4 -> 100 utilisateurs"),
        Stage::new(500, 50, 30, "Palier 5 -> 500 utilisateurs"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_values_round_trip() {
        for stage in default_stages() {
            assert_eq!(Stage::parse_flag(&stage.flag_value()).unwrap(), stage);
        }
    }

    #[test]
    fn label_is_optional() {
        let stage = Stage::parse_flag("20:5:30").unwrap();
        assert_eq!(stage.users, 20);
        assert_eq!(stage.ramp, 5);
        assert_eq!(stage.duration_secs, 30);
        assert_eq!(stage.label, "Palier -> 20 utilisateurs");
    }

    #[test]
    fn labels_may_contain_colons() {
        let stage = Stage::parse_flag("50:10:30:Palier 3 : 50 users").unwrap();
        assert_eq!(stage.label, "Palier 3 : 50 users");
    }

    #[test]
    fn rejects_incomplete_specs() {
        assert!(Stage::parse_flag("20:5").is_err());
        assert!(Stage::parse_flag("").is_err());
        assert!(Stage::parse_flag("a:b:c").is_err());
    }
}
