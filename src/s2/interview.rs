//! Security interview: which classes does a node hold?
//!
//! The controller cannot ask a node for its security class directly; it
//! probes by sending `CommandsSupportedGet` encapsulated under candidate
//! classes and watching which one the node answers. A node silently drops
//! frames under classes it does not hold, so "could not decode" and
//! timeouts are part of the protocol here, not faults.

use crate::host::{SecurityHost, SendCommandOptions, TransportError};
use crate::s2::kex::{CommandsSupportedGet, CommandsSupportedReport};
use crate::s2::{Security2Command, Security2CommandExt, SecurityError};
use crate::types::{EndpointAddr, SecurityClass};
use std::time::Duration;
use tracing::{debug, info};

/// Probe attempts per candidate class on the root device.
const ROOT_QUERY_ATTEMPTS: u32 = 3;

/// Probe attempts per candidate class on a non-root endpoint.
const ENDPOINT_QUERY_ATTEMPTS: u32 = 1;

/// Delay between retries of an undecodable probe.
const QUERY_RETRY_DELAY: Duration = Duration::from_millis(500);

/// S2 classes in probe order, lowest first.
const PROBE_ORDER: [SecurityClass; 3] = [
    SecurityClass::S2Unauthenticated,
    SecurityClass::S2Authenticated,
    SecurityClass::S2AccessControl,
];

/// Result of interviewing one endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterviewResult {
    /// The class the endpoint answered under, if any.
    pub granted_class: Option<SecurityClass>,
    /// CCs recorded as securely supported on the endpoint.
    pub securely_supported: Vec<u8>,
}

/// Interview one endpoint of a node.
pub async fn interview_endpoint<H: SecurityHost>(
    host: &mut H,
    endpoint: EndpointAddr,
) -> Result<InterviewResult, TransportError> {
    let node = endpoint.node_id;

    // A known highest S2 class pins the probe to that class alone
    let root_class = host.highest_security_class(node);
    let candidates: Vec<SecurityClass> = match root_class {
        Some(class) if class.is_s2() => vec![class],
        _ => PROBE_ORDER.to_vec(),
    };

    let max_attempts = if endpoint.is_root() {
        ROOT_QUERY_ATTEMPTS
    } else {
        ENDPOINT_QUERY_ATTEMPTS
    };

    for class in &candidates {
        let class = *class;
        if host.has_security_class(node, class) == Some(false) {
            continue;
        }
        if !host.security_manager().has_keys_for_security_class(class) {
            debug!(endpoint = %endpoint, class = %class, "No key configured, skipping class");
            continue;
        }

        debug!(endpoint = %endpoint, class = %class, "Querying secure commands");
        let response = query_supported(host, endpoint, class, max_attempts).await?;

        match response {
            Some(report) => {
                info!(
                    endpoint = %endpoint,
                    class = %class,
                    count = report.cc_list.supported.len(),
                    "Node answered securely"
                );
                host.set_security_class(node, class, true);
                host.record_secure_ccs(endpoint, &report.cc_list.supported);
                return Ok(InterviewResult {
                    granted_class: Some(class),
                    securely_supported: report.cc_list.supported,
                });
            }
            None if candidates.len() > 1 => {
                debug!(endpoint = %endpoint, class = %class, "No answer, class not granted");
                host.set_security_class(node, class, false);
            }
            None => {}
        }
    }

    // Fail-safe: an endpoint whose root class is unknown and which never
    // answered keeps all of its CCs on the encrypted path.
    if !endpoint.is_root() && root_class.is_none() {
        let ccs = host.endpoint_cc_list(endpoint);
        info!(endpoint = %endpoint, "Root class unknown, marking all endpoint CCs secure");
        host.record_secure_ccs(endpoint, &ccs);
        return Ok(InterviewResult {
            granted_class: None,
            securely_supported: ccs,
        });
    }

    Ok(InterviewResult::default())
}

/// One class probe with the decode-failure retry loop.
async fn query_supported<H: SecurityHost>(
    host: &mut H,
    endpoint: EndpointAddr,
    class: SecurityClass,
    max_attempts: u32,
) -> Result<Option<CommandsSupportedReport>, TransportError> {
    let options = SendCommandOptions::node_query().with_security_class(class);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match host
            .send_command(endpoint.node_id, CommandsSupportedGet.to_raw(), options)
            .await
        {
            Ok(Some(raw)) if raw.is_s2_command(Security2Command::CommandsSupportedReport) => {
                let report =
                    CommandsSupportedReport::parse(&raw.payload).map_err(SecurityError::from)?;
                return Ok(Some(report));
            }
            Ok(_) => return Ok(None),
            Err(TransportError::CannotDecode) if attempt < max_attempts => {
                debug!(
                    endpoint = %endpoint,
                    class = %class,
                    attempt,
                    "Undecodable answer, retrying"
                );
                host.wait(QUERY_RETRY_DELAY).await;
            }
            Err(TransportError::CannotDecode) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}
