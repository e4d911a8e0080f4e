//! `Link` header parsing for publish requests.
//!
//! Publishers advertise the hub they target (`rel="hub"`) and the topic
//! itself (`rel="self"`); a publish is only accepted when both are present.

use url::Url;

use crate::error::{HubError, HubResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHeader {
    pub link: Url,
    pub relationship: String,
}

impl LinkHeader {
    /// Parse a comma separated `Link` header value.
    ///
    /// Every entry must be `<http...>; rel=value`, in either order.
    pub fn parse(value: &str) -> HubResult<Vec<LinkHeader>> {
        value.split(',').map(Self::parse_entry).collect()
    }

    fn parse_entry(entry: &str) -> HubResult<LinkHeader> {
        let parts: Vec<&str> = entry.split(';').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(HubError::link(
                "Link headers require 2 parts, a link and a rel",
            ));
        }

        let rels: Vec<&str> = parts
            .iter()
            .copied()
            .filter(|p| p.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("rel")))
            .collect();
        let [rel] = rels.as_slice() else {
            return Err(HubError::link("Missing rel"));
        };

        let rel_value: Vec<&str> = rel.split('=').collect();
        let [_, relationship] = rel_value.as_slice() else {
            return Err(HubError::link("Rel format is rel=value"));
        };

        let links: Vec<&str> = parts
            .iter()
            .map(|p| p.trim_matches(|c| c == '<' || c == '>' || c == '/'))
            .filter(|p| p.starts_with("http"))
            .collect();
        let [link] = links.as_slice() else {
            return Err(HubError::link("Link must be an http url"));
        };

        let link = Url::parse(link)
            .map_err(|e| HubError::link(format!("Invalid link '{link}': {e}")))?;

        Ok(LinkHeader {
            link,
            relationship: relationship.trim().trim_matches('"').to_string(),
        })
    }
}

/// Extract the requested hub location from all `Link` header values.
///
/// Returns `None` unless both a `rel="hub"` and a `rel="self"` link are
/// present.
pub fn hub_location<'a>(values: impl IntoIterator<Item = &'a str>) -> HubResult<Option<Url>> {
    let mut links = Vec::new();
    for value in values {
        links.extend(LinkHeader::parse(value)?);
    }

    let has = |rel: &str| links.iter().any(|l| l.relationship.eq_ignore_ascii_case(rel));
    if !(has("hub") && has("self")) {
        return Ok(None);
    }

    Ok(links
        .iter()
        .find(|l| l.relationship.eq_ignore_ascii_case("hub"))
        .map(|l| l.link.clone()))
}
