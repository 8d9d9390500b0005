use std::collections::BTreeMap;

use forknet_config::topology::{NetworkId, NodeId, TopologyPlan, WitnessIdentity};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("witness '{name}' is not part of the topology")]
pub struct UnknownWitness {
    pub name: String,
}

/// Which node signs for which witness. Built from the plan, never derived
/// from names.
#[derive(Clone, Debug, Default)]
pub struct WitnessRegistry {
    order: Vec<String>,
    owners: BTreeMap<String, NodeId>,
    identities: BTreeMap<String, WitnessIdentity>,
}

impl WitnessRegistry {
    #[must_use]
    pub fn from_plan(plan: &TopologyPlan) -> Self {
        let mut registry = Self::default();
        for node in plan.networks.iter().flat_map(|network| network.nodes.iter()) {
            for witness in &node.witnesses {
                registry.order.push(witness.name().to_owned());
                registry.owners.insert(witness.name().to_owned(), node.id);
                registry
                    .identities
                    .insert(witness.name().to_owned(), witness.clone());
            }
        }
        registry
    }

    #[must_use]
    pub fn owner(&self, name: &str) -> Option<NodeId> {
        self.owners.get(name).copied()
    }

    #[must_use]
    pub fn identity(&self, name: &str) -> Option<&WitnessIdentity> {
        self.identities.get(name)
    }

    /// Witnesses hosted in `network`, in declaration order.
    pub fn in_network(&self, network: NetworkId) -> impl Iterator<Item = &WitnessIdentity> {
        self.order.iter().filter_map(move |name| {
            let owner = self.owners.get(name)?;
            (owner.network == network)
                .then(|| self.identities.get(name))
                .flatten()
        })
    }

    pub fn all(&self) -> impl Iterator<Item = &WitnessIdentity> {
        self.order
            .iter()
            .filter_map(|name| self.identities.get(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Looks up every name; fails on the first unknown one.
    pub fn select<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<WitnessIdentity>, UnknownWitness> {
        names
            .into_iter()
            .map(|name| {
                self.identity(name).cloned().ok_or_else(|| UnknownWitness {
                    name: name.to_owned(),
                })
            })
            .collect()
    }
}
