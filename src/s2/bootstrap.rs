//! Controller-side S2 bootstrap.
//!
//! Runs the KEX ladder against a joining node: negotiate scheme and ECDH
//! profile, exchange Curve25519 public keys, derive the temp key, verify
//! both sides hold it by echoing the negotiation frames, then hand over
//! the network key of every granted class and confirm each transfer.
//!
//! The host performs encapsulation (and the nonce dialog it may require)
//! on `send_command`; this module only sequences the dialog and owns the
//! temp-key lifecycle.

use crate::crypto::{compute_temp_prk, derive_temp_keys};
use crate::host::{SecurityHost, SendCommandOptions, TransportError};
use crate::s2::kex::{
    echo_matches, EcdhProfile, KexFail, KexFailReason, KexGet, KexReport, KexScheme, KexSet,
    NetworkKeyGet, NetworkKeyReport, PublicKeyReport, TransferEnd,
};
use crate::s2::{Security2Command, Security2CommandExt, SecurityError};
use crate::types::{NodeId, SecurityClass, SECURITY_CLASS_ORDER};
use rand::rngs::OsRng;
use std::time::Duration;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

/// Per-step timeout of the bootstrap dialog.
pub const BOOTSTRAP_STEP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Options and Outcome
// ============================================================================

/// Controller-side bootstrap parameters.
#[derive(Clone, Debug)]
pub struct BootstrapOptions {
    /// Classes the controller is willing to grant. Intersected with the
    /// node's request and with the configured keys.
    pub grantable: Vec<SecurityClass>,
    /// Permit client-side authentication.
    pub permit_csa: bool,
    /// Per-step dialog timeout.
    pub step_timeout: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            grantable: SECURITY_CLASS_ORDER.to_vec(),
            permit_csa: false,
            step_timeout: BOOTSTRAP_STEP_TIMEOUT,
        }
    }
}

/// How a bootstrap attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// All granted keys transferred and verified.
    Success { granted: Vec<SecurityClass> },
    /// The dialog was aborted; the reason was sent to the peer.
    Failed { reason: KexFailReason },
}

// ============================================================================
// The Ladder
// ============================================================================

/// Bootstrap a joining node.
pub async fn bootstrap_node<H: SecurityHost>(
    host: &mut H,
    node: NodeId,
    options: BootstrapOptions,
) -> Result<BootstrapOutcome, TransportError> {
    // --- Negotiate -----------------------------------------------------
    let kex_report_raw = match host
        .send_command(node, KexGet.to_raw(), SendCommandOptions::default())
        .await?
    {
        Some(raw) if raw.is_s2_command(Security2Command::KexReport) => raw,
        Some(_) | None => {
            return abort(host, node, KexFailReason::BootstrappingCanceled).await;
        }
    };
    let kex_report = KexReport::parse(&kex_report_raw.payload).map_err(SecurityError::from)?;
    debug!(node = %node, requested = ?kex_report.requested_keys, "KEX report received");

    if !kex_report.supported_schemes.contains(&KexScheme::Scheme1) {
        return abort(host, node, KexFailReason::NoSupportedScheme).await;
    }
    if !kex_report
        .supported_profiles
        .contains(&EcdhProfile::Curve25519)
    {
        return abort(host, node, KexFailReason::NoSupportedCurve).await;
    }

    let granted: Vec<SecurityClass> = SECURITY_CLASS_ORDER
        .into_iter()
        .filter(|c| kex_report.requested_keys.contains(c))
        .filter(|c| options.grantable.contains(c))
        .filter(|c| host.security_manager().has_keys_for_security_class(*c))
        .collect();
    if granted.is_empty() {
        return abort(host, node, KexFailReason::NoKeysRequested).await;
    }

    let kex_set = KexSet {
        echo: false,
        permit_csa: options.permit_csa && kex_report.request_csa,
        selected_scheme: KexScheme::Scheme1,
        selected_profile: EcdhProfile::Curve25519,
        granted_keys: granted.clone(),
    };

    // --- Public key exchange -------------------------------------------
    let node_public_key = match host
        .send_command(node, kex_set.to_raw(), SendCommandOptions::default())
        .await?
    {
        Some(raw) if raw.is_s2_command(Security2Command::PublicKeyReport) => {
            let report = PublicKeyReport::parse(&raw.payload).map_err(SecurityError::from)?;
            if report.including_node {
                // The joining side must clear this flag
                return abort(host, node, KexFailReason::BootstrappingCanceled).await;
            }
            report.public_key
        }
        Some(_) | None => {
            return abort(host, node, KexFailReason::BootstrappingCanceled).await;
        }
    };

    let our_secret = StaticSecret::random_from_rng(OsRng);
    let our_public = PublicKey::from(&our_secret);
    host.send_command(
        node,
        PublicKeyReport {
            including_node: true,
            public_key: *our_public.as_bytes(),
        }
        .to_raw(),
        SendCommandOptions::default(),
    )
    .await?;

    // --- Temp key ------------------------------------------------------
    let shared_secret = our_secret.diffie_hellman(&PublicKey::from(node_public_key));
    let temp_prk = compute_temp_prk(
        shared_secret.as_bytes(),
        our_public.as_bytes(),
        &node_public_key,
    );
    host.security_manager_mut()
        .set_temp_keys(node, derive_temp_keys(&temp_prk));
    info!(node = %node, "ECDH complete, temp key derived");

    // --- Echo verification ---------------------------------------------
    // Our KEXSet goes back encrypted under the temp key; the node answers
    // with its original KEXReport. Both must match byte for byte apart
    // from the echo bit.
    let mut kex_set_echo = kex_set.clone();
    kex_set_echo.echo = true;
    let echoed_report = match host
        .send_command(node, kex_set_echo.to_raw(), SendCommandOptions::default())
        .await?
    {
        Some(raw) if raw.is_s2_command(Security2Command::KexReport) => raw,
        Some(_) | None => {
            return abort(host, node, KexFailReason::BootstrappingCanceled).await;
        }
    };
    if !echo_matches(&kex_report_raw, &echoed_report) {
        warn!(node = %node, "KEX echo mismatch, aborting bootstrap");
        return abort(host, node, KexFailReason::WrongSecurityLevel).await;
    }

    // --- Key transfer ---------------------------------------------------
    let mut remaining = granted.clone();
    while !remaining.is_empty() {
        let request = match host.receive_command(node, options.step_timeout).await? {
            Some(raw) if raw.is_s2_command(Security2Command::NetworkKeyGet) => {
                NetworkKeyGet::parse(&raw.payload).map_err(SecurityError::from)?
            }
            Some(_) | None => {
                return abort(host, node, KexFailReason::BootstrappingCanceled).await;
            }
        };

        let class = request.requested_key;
        if !remaining.contains(&class) {
            return abort(host, node, KexFailReason::KeyNotGranted).await;
        }
        let network_key = match host.security_manager().get_keys_for_security_class(class) {
            Some(keys) => keys.pnk,
            None => return abort(host, node, KexFailReason::KeyNotGranted).await,
        };

        host.send_command(
            node,
            NetworkKeyReport {
                granted_key: class,
                network_key,
            }
            .to_raw(),
            SendCommandOptions::default(),
        )
        .await?;

        // The node proves possession by encrypting the verify frame under
        // the key it just received; decoding it grants the class.
        match host.receive_command(node, options.step_timeout).await? {
            Some(raw) if raw.is_s2_command(Security2Command::NetworkKeyVerify) => {}
            Some(_) | None => {
                return abort(host, node, KexFailReason::NoVerify).await;
            }
        }
        host.set_security_class(node, class, true);
        debug!(node = %node, class = %class, "Network key verified");

        // Back to the temp key for the transfer confirmation
        host.security_manager_mut().delete_nonce(node);
        host.send_command(
            node,
            TransferEnd {
                key_verified: true,
                key_request_complete: false,
            }
            .to_raw(),
            SendCommandOptions::default(),
        )
        .await?;

        remaining.retain(|c| *c != class);
    }

    // --- Close ----------------------------------------------------------
    match host.receive_command(node, options.step_timeout).await? {
        Some(raw) if raw.is_s2_command(Security2Command::TransferEnd) => {
            let end = TransferEnd::parse(&raw.payload).map_err(SecurityError::from)?;
            if !end.key_request_complete {
                return abort(host, node, KexFailReason::NoVerify).await;
            }
        }
        Some(_) | None => {
            return abort(host, node, KexFailReason::BootstrappingCanceled).await;
        }
    }

    let sm = host.security_manager_mut();
    sm.delete_temp_keys(node);
    sm.delete_nonce(node);
    for class in SECURITY_CLASS_ORDER {
        if !granted.contains(&class) {
            sm.set_security_class(node, class, false);
        }
    }

    info!(node = %node, granted = ?granted, "Bootstrap complete");
    Ok(BootstrapOutcome::Success { granted })
}

/// Send a KEXFail, tear down temp state and report the failure.
async fn abort<H: SecurityHost>(
    host: &mut H,
    node: NodeId,
    reason: KexFailReason,
) -> Result<BootstrapOutcome, TransportError> {
    warn!(node = %node, reason = %reason, "Bootstrap failed");
    // Best effort; the node may already be gone
    let _ = host
        .send_command(node, KexFail::new(reason).to_raw(), SendCommandOptions::default())
        .await;
    let sm = host.security_manager_mut();
    sm.delete_temp_keys(node);
    sm.delete_nonce(node);
    Ok(BootstrapOutcome::Failed { reason })
}
