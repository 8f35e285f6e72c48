//! Server-selection policies
//!
//! A policy turns the resolved address list into the order in which
//! addresses are attempted during one connect sweep. The backing list is
//! never mutated; an empty list yields an empty sequence for every variant.

use std::net::Ipv4Addr;

use rand::seq::SliceRandom;

use crate::address::Address;

/// Caller-supplied sequencing function for [`Policy::Custom`].
///
/// Called with the resolved address list and a 1-based attempt counter that
/// keeps incrementing across sweeps; each `Some` is attempted in turn and
/// `None` ends the sweep. The function is trusted to return `None`
/// eventually; the policy does not bound it.
pub type CustomSelector = Box<dyn FnMut(&[Address], usize) -> Option<Address> + Send>;

/// Strategy for ordering candidate addresses
pub enum Policy {
    /// Resolver order, once each. The default.
    Ordered,
    /// One full random permutation per sweep, no repeats within the pass
    Random,
    /// Descending IP-prefix affinity against the local machine's address
    Nearest,
    /// Caller-supplied sequencing function with a persistent attempt counter
    Custom { selector: CustomSelector, attempts: usize },
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Ordered
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Ordered => f.write_str("Ordered"),
            Policy::Random => f.write_str("Random"),
            Policy::Nearest => f.write_str("Nearest"),
            Policy::Custom { attempts, .. } => {
                f.debug_struct("Custom").field("attempts", attempts).finish()
            }
        }
    }
}

impl Policy {
    /// Wrap a sequencing function as a custom policy
    pub fn custom(f: impl FnMut(&[Address], usize) -> Option<Address> + Send + 'static) -> Self {
        Policy::Custom {
            selector: Box::new(f),
            attempts: 0,
        }
    }

    /// Produce the attempt order for one connect sweep
    pub fn sequence<'a>(&'a mut self, addresses: &'a [Address]) -> Sequence<'a> {
        match self {
            Policy::Ordered => Sequence::Slice(addresses.iter()),
            Policy::Random => {
                let mut shuffled = addresses.to_vec();
                shuffled.shuffle(&mut rand::thread_rng());
                Sequence::Owned(shuffled.into_iter())
            }
            Policy::Nearest => {
                let local = local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);
                Sequence::Owned(sort_by_affinity(local, addresses).into_iter())
            }
            Policy::Custom { selector, attempts } => Sequence::Custom {
                addresses,
                selector,
                attempts,
                done: addresses.is_empty(),
            },
        }
    }
}

/// Lazy attempt order produced by [`Policy::sequence`]
pub enum Sequence<'a> {
    Slice(std::slice::Iter<'a, Address>),
    Owned(std::vec::IntoIter<Address>),
    Custom {
        addresses: &'a [Address],
        selector: &'a mut CustomSelector,
        attempts: &'a mut usize,
        done: bool,
    },
}

impl Iterator for Sequence<'_> {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        match self {
            Sequence::Slice(iter) => iter.next().cloned(),
            Sequence::Owned(iter) => iter.next(),
            Sequence::Custom {
                addresses,
                selector,
                attempts,
                done,
            } => {
                if *done {
                    return None;
                }
                **attempts += 1;
                let picked = selector(addresses, **attempts);
                if picked.is_none() {
                    *done = true;
                }
                picked
            }
        }
    }
}

/// Locality score: count of matching leading IPv4 octets (0-4)
fn affinity_score(local: Ipv4Addr, candidate: Ipv4Addr) -> u8 {
    local
        .octets()
        .iter()
        .zip(candidate.octets().iter())
        .take_while(|(a, b)| a == b)
        .count() as u8
}

/// Sort addresses by descending affinity to `local`; the sort is stable so
/// ties keep their resolved order.
fn sort_by_affinity(local: Ipv4Addr, addresses: &[Address]) -> Vec<Address> {
    let mut scored: Vec<(u8, Address)> = addresses
        .iter()
        .map(|a| (affinity_score(local, a.ip()), a.clone()))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, a)| a).collect()
}

/// Best-effort discovery of the local machine's outbound IPv4 address.
/// Connecting a UDP socket sends no packets; it only selects a route.
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 53)).ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) => Some(*addr.ip()),
        _ => None,
    }
}
