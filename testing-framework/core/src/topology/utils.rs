use std::collections::BTreeSet;

use forknet_config::nodes::NodePorts;

const MAX_PICK_ATTEMPTS: usize = 64;

/// Picks three free TCP ports not yet in `taken` and records them there.
pub fn pick_free_ports(taken: &mut BTreeSet<u16>) -> Option<NodePorts> {
    let mut next = || {
        for _ in 0..MAX_PICK_ATTEMPTS {
            let port = portpicker::pick_unused_port()?;
            if taken.insert(port) {
                return Some(port);
            }
        }
        None
    };

    Some(NodePorts {
        p2p: next()?,
        http: next()?,
        ws: next()?,
    })
}

/// Unordered pair key.
#[must_use]
pub fn ordered_pair<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picked_ports_are_distinct_and_recorded() {
        let mut taken = BTreeSet::new();
        let first = pick_free_ports(&mut taken).unwrap();
        let second = pick_free_ports(&mut taken).unwrap();

        let all = [
            first.p2p,
            first.http,
            first.ws,
            second.p2p,
            second.http,
            second.ws,
        ];
        assert_eq!(all.iter().collect::<BTreeSet<_>>().len(), 6);
        assert_eq!(taken.len(), 6);
    }

    #[test]
    fn pairs_are_order_independent() {
        assert_eq!(ordered_pair(3, 1), ordered_pair(1, 3));
    }
}
