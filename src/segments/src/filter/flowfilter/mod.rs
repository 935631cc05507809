//! Runs flows through a filter expression and forwards only matching flows.

pub mod parser;

use async_trait::async_trait;
use model::EnrichedFlow;

use crate::base::{
    reject, BaseFilterSegment, BaseSegment, FlowSender, Segment, SegmentConfig, SegmentError,
};
use parser::{Direction, Expression, IfaceDirection};

/// Filter segment driven by the expression DSL in [`parser`].
///
/// The `filter` config key holds the expression; an empty or absent filter
/// accepts every flow. Syntax errors are fatal config errors.
pub struct FlowFilter {
    filter: BaseFilterSegment,
    expression: Expression,
    raw: String,
}

impl FlowFilter {
    pub fn from_config(config: &SegmentConfig) -> Result<Self, SegmentError> {
        let raw = config.get("filter").cloned().unwrap_or_default();
        let expression =
            parser::parse(&raw).map_err(|err| SegmentError::InvalidConfig {
                segment: "flowfilter",
                key: "filter",
                value: raw.clone(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            filter: BaseFilterSegment::default(),
            expression,
            raw,
        })
    }
}

#[async_trait]
impl Segment for FlowFilter {
    fn name(&self) -> &'static str {
        "flowfilter"
    }

    fn base(&self) -> &BaseSegment {
        &self.filter.base
    }

    fn base_mut(&mut self) -> &mut BaseSegment {
        &mut self.filter.base
    }

    fn subscribe_drops(&mut self, drops: FlowSender) {
        self.filter.subscribe_drops(drops);
    }

    async fn run(&mut self) {
        let (mut input, output) = self.filter.base.take_wiring();
        let drops = self.filter.take_drops();
        tracing::info!(segment = "flowfilter", filter = %self.raw, "using filter expression");
        while let Some(flow) = input.recv().await {
            if matches(&self.expression, &flow) {
                if output.send(flow).await.is_err() {
                    break;
                }
            } else {
                reject(&drops, flow).await;
            }
        }
    }
}

/// Evaluate a parsed expression against one flow.
pub fn matches(expression: &Expression, flow: &EnrichedFlow) -> bool {
    match expression {
        Expression::Any => true,
        Expression::Or(left, right) => matches(left, flow) || matches(right, flow),
        Expression::And(left, right) => matches(left, flow) && matches(right, flow),
        Expression::Not(inner) => !matches(inner, flow),
        Expression::Proto(proto) => flow.proto == *proto,
        Expression::Port { direction, num } => match direction {
            Direction::Src => num.matches(flow.src_port.into()),
            Direction::Dst => num.matches(flow.dst_port.into()),
            Direction::Either => {
                num.matches(flow.src_port.into()) || num.matches(flow.dst_port.into())
            }
        },
        Expression::Bytes(num) => num.matches(flow.bytes),
        Expression::Packets(num) => num.matches(flow.packets),
        Expression::Address { direction, addr } => match direction {
            Direction::Src => flow.src_addr == Some(*addr),
            Direction::Dst => flow.dst_addr == Some(*addr),
            Direction::Either => flow.src_addr == Some(*addr) || flow.dst_addr == Some(*addr),
        },
        Expression::Iface { direction, num } => match direction {
            IfaceDirection::In => num.matches(flow.in_if.into()),
            IfaceDirection::Out => num.matches(flow.out_if.into()),
            IfaceDirection::Either => {
                num.matches(flow.in_if.into()) || num.matches(flow.out_if.into())
            }
        },
        Expression::Cid(num) => num.matches(flow.cid.into()),
        Expression::Tid(num) => num.matches(flow.tid.into()),
        Expression::Inlist => flow.inlist,
        Expression::Normalized => flow.normalized,
    }
}
