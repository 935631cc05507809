//! Filter segments. All of them carry the drops side-channel: when a drops
//! sender is subscribed, rejected flows are routed there instead of being
//! discarded, so composites like `branch` can observe the reject path.

pub mod drop;
pub mod elephant;
pub mod flowfilter;
