//! XML tick payload parser
//!
//! The upstream sends one XML document per message. Market observations are
//! `<m>` (or `<tick>`) elements with short attribute names; control signals
//! are bare `<hb/>`, `<ack/>` and `<renewed/>` elements. Anything else is
//! ignored so new upstream elements don't break the feed.

use super::types::{ControlMessage, MarketKind, ParsedPayload, Tick};
use chrono::{DateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Instant;
use thiserror::Error;

/// Document-level parse failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Payload was empty or whitespace
    #[error("empty payload")]
    Empty,
    /// Payload is not well-formed XML
    #[error("malformed XML at byte {position}: {reason}")]
    Malformed { position: u64, reason: String },
}

/// Parser for normalized feed payloads
#[derive(Debug, Clone, Default)]
pub struct TickParser {
    /// League assigned to records that carry none
    default_league: String,
}

impl TickParser {
    /// Create a parser with no default league
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `league` to records that don't carry one
    pub fn with_default_league(league: impl Into<String>) -> Self {
        Self {
            default_league: league.into(),
        }
    }

    /// Parse one payload into ticks and control signals
    ///
    /// Malformed records are dropped and counted in `rejected`; only a
    /// document that isn't well-formed XML fails as a whole.
    pub fn parse(&self, payload: &str) -> Result<ParsedPayload, ParseError> {
        let body = payload.trim_start_matches('\u{feff}').trim();
        if body.is_empty() {
            return Err(ParseError::Empty);
        }

        let received_at = Instant::now();
        let received_wall = Utc::now();

        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);

        let mut parsed = ParsedPayload::default();
        let mut root_seen = false;
        let mut root_ts: Option<DateTime<Utc>> = None;

        loop {
            let event = reader.read_event().map_err(|e| ParseError::Malformed {
                position: reader.buffer_position(),
                reason: e.to_string(),
            })?;

            match event {
                Event::Start(element) | Event::Empty(element) => {
                    let attrs = read_attributes(&element).map_err(|reason| {
                        ParseError::Malformed {
                            position: reader.buffer_position(),
                            reason,
                        }
                    })?;

                    if !root_seen {
                        root_seen = true;
                        root_ts = attr(&attrs, &["ts"]).and_then(parse_epoch_millis);
                    }

                    match element.name().as_ref() {
                        b"hb" | b"heartbeat" => parsed.control.push(ControlMessage::Heartbeat),
                        b"ack" => parsed.control.push(ControlMessage::Ack),
                        b"renewed" => parsed.control.push(ControlMessage::Renewed),
                        b"m" | b"tick" => {
                            let observed_default = root_ts.unwrap_or(received_wall);
                            match self.tick_from_attributes(&attrs, observed_default, received_at)
                            {
                                Ok(tick) => parsed.ticks.push(tick),
                                Err(reason) => {
                                    parsed.rejected += 1;
                                    tracing::debug!(reason, "Rejected tick record");
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !root_seen {
            return Err(ParseError::Malformed {
                position: 0,
                reason: "no root element".to_string(),
            });
        }

        Ok(parsed)
    }

    fn tick_from_attributes(
        &self,
        attrs: &[(String, String)],
        observed_default: DateTime<Utc>,
        received_at: Instant,
    ) -> Result<Tick, &'static str> {
        let match_id = required(attrs, &["id", "match"]).ok_or("missing match id")?;
        let market = required(attrs, &["mk", "market"]).ok_or("missing market")?;
        let selection = required(attrs, &["sel", "selection"]).ok_or("missing selection")?;

        let value = required(attrs, &["v", "value"])
            .ok_or("missing value")
            .and_then(|v| Decimal::from_str(v).map_err(|_| "unparsable value"))?;

        let volume = match attr(attrs, &["vol", "volume"]) {
            Some(v) => Some(Decimal::from_str(v).map_err(|_| "unparsable volume")?),
            None => None,
        };

        let observed_at = match attr(attrs, &["ts"]) {
            Some(ts) => parse_epoch_millis(ts).ok_or("unparsable timestamp")?,
            None => observed_default,
        };

        let league = attr(attrs, &["lg", "league"])
            .map(str::to_string)
            .unwrap_or_else(|| self.default_league.clone());

        Ok(Tick {
            match_id: match_id.to_string(),
            league,
            market: MarketKind::parse(market),
            selection: selection.to_string(),
            value,
            volume,
            observed_at,
            received_at,
        })
    }
}

/// Build the in-place renewal request carrying a fresh token
pub fn renew_request(token: &str) -> String {
    format!("<renew token=\"{}\"/>", quick_xml::escape::escape(token))
}

fn read_attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            Ok((key, value.into_owned()))
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], names: &[&str]) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| names.contains(&key.as_str()))
        .map(|(_, value)| value.as_str())
}

fn required<'a>(attrs: &'a [(String, String)], names: &[&str]) -> Option<&'a str> {
    attr(attrs, names)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
