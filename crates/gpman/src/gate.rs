//! Diversification safety gate
//!
//! Cards with diversified keys reject the plain default key, and every
//! rejected authentication counts towards permanently blocking the
//! security domain. When the operator says the card is still virgin and
//! plans to use the default key, the card production data is checked for
//! a family known to ship diversified, and the run stops before any
//! authentication attempt.

use tracing::debug;

use crate::{
    Error, Result,
    card::SecureChannelEngine,
    config::SessionOptions,
    cplc::Cplc,
    keys::{Diversification, KeySet},
    report::Reporter,
};

/// OS identifier of a card family that ships with EMV diversified keys
const EMV_DIVERSIFIED_OS_ID: u16 = 0x1671;

/// Diversification scheme the production data hints at
pub fn suggest_diversification(cplc: Option<&Cplc>) -> Diversification {
    match cplc {
        Some(cplc) if cplc.os_id() == EMV_DIVERSIFIED_OS_ID => Diversification::Emv,
        _ => Diversification::None,
    }
}

/// Whether the gate has to look at the card at all
pub fn applies(keys: &KeySet, options: &SessionOptions) -> bool {
    keys.keys().mac().is_default() && options.virgin && options.strict()
}

/// Run the gate against a selected card
///
/// Fails with [`Error::DiversificationRequired`] when the card likely needs
/// a diversification scheme that was not requested and the key version is
/// still the card default.
pub fn check<C>(
    card: &mut C,
    keys: &KeySet,
    options: &SessionOptions,
    reporter: &mut dyn Reporter,
) -> Result<()>
where
    C: SecureChannelEngine + ?Sized,
{
    if !applies(keys, options) {
        return Ok(());
    }

    let cplc = card.cplc().unwrap_or_else(|e| {
        debug!(error = %e, "could not read CPLC, assuming no diversification");
        None
    });
    let suggested = suggest_diversification(cplc.as_ref());
    debug!(%suggested, "diversification gate");

    if suggested == Diversification::None || keys.key_version() != 0x00 {
        return Ok(());
    }

    reporter.warning(&format!(
        "A virgin card that has not been used with this tool before probably requires \
         {suggested} diversification but it was not asked for."
    ));
    reporter.warning(&format!(
        "Use {} for {suggested} diversification, or drop --virgin, or run with --relax.",
        suggested.flag()
    ));
    reporter.warning(
        "Repeated failed authentication permanently blocks the card, not authenticating.",
    );
    Err(Error::DiversificationRequired { suggested })
}
