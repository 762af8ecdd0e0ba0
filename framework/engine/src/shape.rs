use siteload_core::stage::Stage;

/// Walks the stage table against elapsed run time.
///
/// [`LoadShape::tick`] is the scheduler's only view of the profile: it returns
/// the active stage's `(users, ramp)` while the run is inside the table and
/// `None` once the total configured duration has elapsed. The stage
/// transition is logged exactly once per stage, the caller's sole signal that
/// the profile advanced.
#[derive(Debug)]
pub struct LoadShape {
    stages: Vec<Stage>,
    current: Option<usize>,
}

impl LoadShape {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            current: None,
        }
    }

    pub fn total_duration_secs(&self) -> u64 {
        self.stages.iter().map(|stage| stage.duration_secs).sum()
    }

    /// Index of the stage the last `tick` landed on, if any.
    pub fn current_stage(&self) -> Option<usize> {
        self.current
    }

    pub fn tick(&mut self, elapsed_secs: u64) -> Option<(u32, u32)> {
        let mut cumulative = 0;

        for (index, stage) in self.stages.iter().enumerate() {
            cumulative += stage.duration_secs;
            if elapsed_secs < cumulative {
                if self.current != Some(index) {
                    self.current = Some(index);
                    log::info!("{}", "=".repeat(52));
                    log::info!("  >> {}", stage.label);
                    log::info!(
                        "  Duree : {}s | Spawn rate : {}/s",
                        stage.duration_secs,
                        stage.ramp
                    );
                    log::info!("{}", "=".repeat(52));
                }
                return Some((stage.users, stage.ramp));
            }
        }

        None
    }
}
