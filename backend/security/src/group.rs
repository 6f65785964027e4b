//! Group helpers shared by every key strength: hashing to scalars, deriving
//! generators nobody knows the discrete log of, and point encoding.

use elliptic_curve::ff::{Field, PrimeField};
use elliptic_curve::group::{Group, GroupEncoding};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

/// Upper bound on try-and-increment rounds when deriving a fixed point.
const MAX_POINT_ATTEMPTS: u32 = 1024;

/// Expand `parts` under `domain` into `len` pseudo-random bytes.
///
/// Every input is length-prefixed so distinct part lists never collide.
pub(crate) fn expand(domain: &[u8], parts: &[&[u8]], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 64);
    let mut counter: u32 = 0;
    while out.len() < len {
        let mut hasher = Sha512::new();
        hasher.update(counter.to_be_bytes());
        absorb(&mut hasher, domain);
        for part in parts {
            absorb(&mut hasher, part);
        }
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn absorb(hasher: &mut Sha512, data: &[u8]) {
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(data);
}

/// Hash to a scalar with 128 bits of slack so the modular bias is negligible.
pub(crate) fn hash_to_scalar<S: PrimeField>(domain: &[u8], parts: &[&[u8]]) -> S {
    let len = (S::NUM_BITS as usize).div_ceil(8) + 16;
    let radix = S::from(256u64);
    expand(domain, parts, len)
        .iter()
        .fold(S::ZERO, |acc, byte| acc * radix + S::from(u64::from(*byte)))
}

pub(crate) fn random_nonzero_scalar<S: PrimeField>() -> S {
    loop {
        let candidate = S::random(&mut OsRng);
        if !bool::from(candidate.is_zero()) {
            return candidate;
        }
    }
}

/// Derive a group element from `label` by hashing to a compressed x
/// coordinate until one decodes.
///
/// Assumes SEC1 compressed encoding, which holds for every NIST curve here.
pub(crate) fn fixed_point<G: Group + GroupEncoding>(label: &[u8]) -> Option<G> {
    let mut repr = G::Repr::default();
    let len = repr.as_ref().len();
    if len < 2 {
        return None;
    }
    let excess = ((len - 1) * 8).saturating_sub(<G::Scalar as PrimeField>::NUM_BITS as usize);
    let mask = if excess >= 8 { 0 } else { 0xFFu8 >> excess };

    for attempt in 0..MAX_POINT_ATTEMPTS {
        let x = expand(b"codepair/fixed-point", &[label, &attempt.to_be_bytes()], len - 1);
        let buf = repr.as_mut();
        buf[0] = 0x02;
        buf[1..].copy_from_slice(&x);
        buf[1] &= mask;

        let candidate: Option<G> = Option::from(G::from_bytes(&repr));
        if let Some(point) = candidate {
            if !bool::from(point.is_identity()) {
                return Some(point);
            }
        }
    }
    None
}

pub(crate) fn encode_point<G: GroupEncoding>(point: &G) -> Vec<u8> {
    point.to_bytes().as_ref().to_vec()
}

/// Decode a point, rejecting wrong lengths, off-curve data and the identity.
pub(crate) fn decode_point<G: Group + GroupEncoding>(bytes: &[u8]) -> Option<G> {
    let mut repr = G::Repr::default();
    if repr.as_ref().len() != bytes.len() {
        return None;
    }
    repr.as_mut().copy_from_slice(bytes);
    let point: Option<G> = Option::from(G::from_bytes(&repr));
    point.filter(|p| !bool::from(p.is_identity()))
}
