//! Process-wide mapping from segment tag to factory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::base::{Segment, SegmentError};

/// Factory producing a fresh, unwired segment from its config map.
pub type SegmentFactory =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<Box<dyn Segment>, SegmentError> + Send + Sync>;

/// Registry mapping segment tags to factories.
///
/// Registration happens before any pipeline is built; registering the same
/// tag twice is a programming error and panics. The `branch` tag is reserved
/// for the pipeline builder and never appears here.
pub struct SegmentRegistry {
    factories: RwLock<HashMap<String, SegmentFactory>>,
}

impl SegmentRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, tag: &str, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Box<dyn Segment>, SegmentError>
            + Send
            + Sync
            + 'static,
    {
        let mut guard = self.factories.write().expect("segment registry poisoned");
        if guard.insert(tag.to_string(), Arc::new(factory)).is_some() {
            panic!("segment tag `{tag}` registered twice");
        }
    }

    pub fn lookup(&self, tag: &str) -> Option<SegmentFactory> {
        let guard = self.factories.read().expect("segment registry poisoned");
        guard.get(tag).cloned()
    }

    /// Look up `tag` and build a fresh instance for one pipeline slot.
    pub fn instantiate(
        &self,
        tag: &str,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn Segment>, SegmentError> {
        let factory = self
            .lookup(tag)
            .ok_or_else(|| SegmentError::UnknownSegment(tag.to_string()))?;
        factory(config)
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry, pre-populated with every built-in segment on
/// first access. External segment packages register here before building
/// pipelines.
pub fn registry() -> &'static SegmentRegistry {
    static REGISTRY: Lazy<SegmentRegistry> = Lazy::new(|| {
        let registry = SegmentRegistry::new();
        register_builtin_segments(&registry);
        registry
    });
    &REGISTRY
}

fn register_builtin_segments(registry: &SegmentRegistry) {
    registry.register("pass", |config| {
        Ok(Box::new(crate::pass::Pass::from_config(config)?))
    });
    registry.register("drop", |config| {
        Ok(Box::new(crate::filter::drop::DropSegment::from_config(
            config,
        )?))
    });
    registry.register("flowfilter", |config| {
        Ok(Box::new(crate::filter::flowfilter::FlowFilter::from_config(
            config,
        )?))
    });
    registry.register("elephant", |config| {
        Ok(Box::new(crate::filter::elephant::Elephant::from_config(
            config,
        )?))
    });
    registry.register("dropfields", |config| {
        Ok(Box::new(crate::modify::dropfields::DropFields::from_config(
            config,
        )?))
    });
    registry.register("normalize", |config| {
        Ok(Box::new(crate::modify::normalize::Normalize::from_config(
            config,
        )?))
    });
    registry.register("remoteaddress", |config| {
        Ok(Box::new(
            crate::modify::remoteaddress::RemoteAddress::from_config(config)?,
        ))
    });
    registry.register("matching", |config| {
        Ok(Box::new(crate::matching::Matching::from_config(config)?))
    });
    registry.register("stdin", |config| {
        Ok(Box::new(crate::input::stdin::StdIn::from_config(config)?))
    });
    registry.register("generator", |config| {
        Ok(Box::new(crate::testing::generator::Generator::from_config(
            config,
        )?))
    });
    registry.register("json", |config| {
        Ok(Box::new(crate::output::json::Json::from_config(config)?))
    });
    registry.register("csv", |config| {
        Ok(Box::new(crate::output::csv::Csv::from_config(config)?))
    });
    registry.register("mqtt", |config| {
        Ok(Box::new(crate::output::mqtt::Mqtt::from_config(config)?))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_builtin_factories() {
        assert!(registry().lookup("pass").is_some());
        assert!(registry().lookup("flowfilter").is_some());
        assert!(registry().lookup("no-such-segment").is_none());
    }

    #[test]
    fn instantiate_unknown_tag_fails() {
        let err = registry()
            .instantiate("no-such-segment", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, SegmentError::UnknownSegment(_)));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let registry = SegmentRegistry::new();
        registry.register("twice", |config| {
            Ok(Box::new(crate::pass::Pass::from_config(config)?))
        });
        registry.register("twice", |config| {
            Ok(Box::new(crate::pass::Pass::from_config(config)?))
        });
    }
}
