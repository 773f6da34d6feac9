//! Automatic context: categorical fields derived from request signals (device headers, viewer
//! location, local time) according to declarative rules.
mod auto_values;
mod rules;

pub use auto_values::{
    derive_context, season, AutoContext, RequestSignals, ResolvedField, Season,
    VIEWER_LATITUDE_HEADER, VIEWER_TIME_ZONE_HEADER,
};
pub use rules::SignalValue;
