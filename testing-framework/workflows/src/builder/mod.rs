use forknet_config::constants::INIT_WITNESS_NAME;

use crate::{
    bootstrap::WitnessBootstrap,
    fork::{ForkBlocks, ForkScenario, LoadPlan},
};

#[derive(Debug, thiserror::Error)]
pub enum BuilderInputError {
    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
    #[error("cannot disable {disabled} of {available} witnesses in the second network")]
    TooManyDisabled { disabled: usize, available: usize },
}

/// Shapes a two-network fork scenario. Defaults: six witnesses next to the
/// init node in network A, fifteen in network B of which fourteen are
/// disabled before the partition.
#[derive(Clone, Debug)]
pub struct ForkScenarioBuilder {
    witnesses_a: Vec<u32>,
    witnesses_b: Vec<u32>,
    disabled_in_b: usize,
    blocks: ForkBlocks,
    load: Option<LoadPlan>,
    bootstrap: Option<WitnessBootstrap>,
}

impl Default for ForkScenarioBuilder {
    fn default() -> Self {
        Self {
            witnesses_a: vec![3, 3],
            witnesses_b: vec![5, 5, 5],
            disabled_in_b: 14,
            blocks: ForkBlocks::default(),
            load: None,
            bootstrap: None,
        }
    }
}

impl ForkScenarioBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Witnesses per witness node of network A.
    #[must_use]
    pub fn witnesses_a(mut self, per_node: impl Into<Vec<u32>>) -> Self {
        self.witnesses_a = per_node.into();
        self
    }

    /// Witnesses per witness node of network B.
    #[must_use]
    pub fn witnesses_b(mut self, per_node: impl Into<Vec<u32>>) -> Self {
        self.witnesses_b = per_node.into();
        self
    }

    /// How many of network B's witnesses go offline before the partition.
    /// The first ones in declaration order stay enabled.
    #[must_use]
    pub const fn disabled_in_b(mut self, disabled: usize) -> Self {
        self.disabled_in_b = disabled;
        self
    }

    #[must_use]
    pub const fn blocks(mut self, blocks: ForkBlocks) -> Self {
        self.blocks = blocks;
        self
    }

    /// Transfer load from the init witness while the networks are apart.
    #[must_use]
    pub fn transfer_load(mut self, workers: usize, to: impl Into<String>) -> Self {
        self.load = Some(LoadPlan {
            workers,
            from: INIT_WITNESS_NAME.to_owned(),
            to: to.into(),
        });
        self
    }

    /// Registers every witness on chain before the first step.
    #[must_use]
    pub fn bootstrap(mut self, bootstrap: WitnessBootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn build(self) -> Result<ForkScenario, BuilderInputError> {
        let total_b = self.witnesses_b.iter().map(|n| *n as usize).sum::<usize>();
        if self.witnesses_a.is_empty() || self.witnesses_a.contains(&0) {
            return Err(BuilderInputError::ZeroValue {
                field: "witnesses_a",
            });
        }
        if self.witnesses_b.is_empty() || self.witnesses_b.contains(&0) {
            return Err(BuilderInputError::ZeroValue {
                field: "witnesses_b",
            });
        }
        if self.disabled_in_b >= total_b {
            return Err(BuilderInputError::TooManyDisabled {
                disabled: self.disabled_in_b,
                available: total_b,
            });
        }
        if let Some(load) = &self.load
            && load.workers == 0
        {
            return Err(BuilderInputError::ZeroValue {
                field: "load workers",
            });
        }

        Ok(ForkScenario {
            witnesses_a: self.witnesses_a,
            witnesses_b: self.witnesses_b,
            disabled_in_b: self.disabled_in_b,
            blocks: self.blocks,
            load: self.load,
            bootstrap: self.bootstrap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_fork() {
        let scenario = ForkScenarioBuilder::new().build().unwrap();
        let description = scenario.description();

        assert_eq!(description.networks.len(), 2);
        assert_eq!(description.networks[0].total_witnesses(), Some(6));
        assert_eq!(description.networks[1].total_witnesses(), Some(15));
        assert_eq!(scenario.disabled_in_b(), 14);
    }

    #[test]
    fn at_least_one_witness_of_b_stays_enabled() {
        let err = ForkScenarioBuilder::new()
            .witnesses_b([2])
            .disabled_in_b(2)
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            BuilderInputError::TooManyDisabled {
                disabled: 2,
                available: 2
            }
        ));
    }

    #[test]
    fn load_needs_workers() {
        assert!(matches!(
            ForkScenarioBuilder::new().transfer_load(0, "alice").build(),
            Err(BuilderInputError::ZeroValue { .. })
        ));
    }
}
