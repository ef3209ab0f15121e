//! JID helpers.
//!
//! A WhatsApp JID looks like `user[_agent][:device]@server`. Device-suffixed
//! JIDs identify one linked device; replies and logs want the bare
//! `user@server` form.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Matches the `:<device>@` part of a device-suffixed JID.
static DEVICE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\d+@").expect("device suffix pattern is valid"));

/// Decoded parts of a JID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JidParts<'a> {
    pub user: &'a str,
    pub server: &'a str,
    pub agent: Option<&'a str>,
    pub device: Option<u32>,
}

/// Split a JID into its parts. Returns `None` when there is no `@`.
pub fn jid_decode(jid: &str) -> Option<JidParts<'_>> {
    let (combined, server) = jid.split_once('@')?;
    let (user_agent, device) = match combined.split_once(':') {
        Some((ua, device)) => (ua, device.parse().ok()),
        None => (combined, None),
    };
    let (user, agent) = match user_agent.split_once('_') {
        Some((user, agent)) => (user, Some(agent)),
        None => (user_agent, None),
    };
    Some(JidParts {
        user,
        server,
        agent,
        device,
    })
}

/// Strip the device suffix from a JID.
///
/// Identifiers without a `:<digits>@` segment are returned unchanged, as are
/// ones that fail to decode into a non-empty user and server.
pub fn decode_jid(jid: &str) -> Cow<'_, str> {
    if !DEVICE_SUFFIX.is_match(jid) {
        return Cow::Borrowed(jid);
    }
    match jid_decode(jid) {
        Some(parts) if !parts.user.is_empty() && !parts.server.is_empty() => {
            Cow::Owned(format!("{}@{}", parts.user, parts.server))
        }
        _ => Cow::Borrowed(jid),
    }
}

/// [`decode_jid`] for optional identifiers; `None` passes through.
pub fn decode_optional_jid(jid: Option<&str>) -> Option<Cow<'_, str>> {
    jid.map(decode_jid)
}
