//! Recognize command handler.

use crate::carrier;

/// Print the carrier a tracking number belongs to.
///
/// # Errors
/// Returns error if no carrier rule matches.
pub fn run_recognize(tracking_number: &str) -> Result<(), Box<dyn std::error::Error>> {
    let carrier = carrier::recognize(tracking_number)?;
    let tail_note = if carrier::requires_phone_tail(&carrier.code) {
        " (queries need the recipient's phone tail)"
    } else {
        ""
    };
    println!("{}: {}{}", tracking_number.trim(), carrier, tail_note);
    Ok(())
}
