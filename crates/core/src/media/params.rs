use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::{NAL_PPS, NAL_SPS, STAP_A, nal_type};
use crate::error::{PacketizerError, Result};
use crate::source::annexb::split_nal_units;

/// STAP-A NAL header + SPS size + PPS size.
const STAP_A_OVERHEAD: usize = 5;

/// Cached SPS/PPS and the STAP-A aggregate built from them.
///
/// ```text
///  0               1               2               3
///  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |STAP-A NAL HDR |         SPS size              |   SPS data    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               |
/// :                                                               :
/// +               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |         PPS size              |   PPS data    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               :
/// ```
///
/// The aggregate is rebuilt on every change and is `None` until both
/// parameter sets are present (RFC 6184 §5.7.1).
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    stap_a: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn new(sps: Vec<u8>, pps: Vec<u8>) -> Self {
        let mut sets = Self::default();
        sets.set(Some(sps), Some(pps));
        sets
    }

    /// Decode base64 SPS/PPS, as carried by `sprop-parameter-sets`.
    pub fn from_base64(sps_b64: &str, pps_b64: &str) -> Result<Self> {
        let decode = |name: &str, value: &str| {
            BASE64_STANDARD
                .decode(value.trim())
                .map_err(|e| PacketizerError::InvalidParameterSet(format!("{name}: {e}")))
        };
        Ok(Self::new(decode("SPS", sps_b64)?, decode("PPS", pps_b64)?))
    }

    /// Locate SPS and PPS in an Annex B codec-config buffer.
    ///
    /// Encoders typically emit `00 00 00 01 <SPS> 00 00 00 01 <PPS>` as
    /// their first output. The first NAL of each type wins.
    pub fn from_annexb(csd: &[u8]) -> Result<Self> {
        let mut sps = None;
        let mut pps = None;
        for nal in split_nal_units(csd) {
            match nal_type(nal[0]) {
                NAL_SPS if sps.is_none() => sps = Some(nal.to_vec()),
                NAL_PPS if pps.is_none() => pps = Some(nal.to_vec()),
                _ => {}
            }
        }
        match (sps, pps) {
            (Some(sps), Some(pps)) => Ok(Self::new(sps, pps)),
            (None, _) => Err(PacketizerError::InvalidParameterSet(
                "no SPS in codec config".into(),
            )),
            (_, None) => Err(PacketizerError::InvalidParameterSet(
                "no PPS in codec config".into(),
            )),
        }
    }

    /// Replace both parameter sets and rebuild the aggregate.
    pub fn set(&mut self, sps: Option<Vec<u8>>, pps: Option<Vec<u8>>) {
        self.sps = sps;
        self.pps = pps;
        self.stap_a = match (self.sps.as_deref(), self.pps.as_deref()) {
            (Some(sps), Some(pps)) => Some(build_stap_a(sps, pps)),
            _ => None,
        };
        tracing::debug!(
            sps_len = self.sps.as_ref().map_or(0, Vec::len),
            pps_len = self.pps.as_ref().map_or(0, Vec::len),
            aggregate = self.stap_a.is_some(),
            "parameter sets updated"
        );
    }

    pub fn clear(&mut self) {
        self.set(None, None);
    }

    pub fn sps(&self) -> Option<&[u8]> {
        self.sps.as_deref()
    }

    pub fn pps(&self) -> Option<&[u8]> {
        self.pps.as_deref()
    }

    /// Precomputed STAP-A payload, present only when both sets are cached.
    pub fn stap_a(&self) -> Option<&[u8]> {
        self.stap_a.as_deref()
    }
}

fn build_stap_a(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sps.len() + pps.len() + STAP_A_OVERHEAD);
    out.push(STAP_A);
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    out
}
