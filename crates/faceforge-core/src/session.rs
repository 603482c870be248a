//! Lazy, configuration-keyed cache of inference adapters.
//!
//! One manager is owned by each pipeline instance; nothing is global. Every
//! adapter kind is created on first use and reused until evicted or until a
//! request arrives with a different configuration.

use crate::adapter::{AdapterFactory, FaceAnalyzer, FaceEnhancer, FaceSwapper};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Analyzer,
    Swapper,
    Enhancer,
}

pub struct SessionManager<F: AdapterFactory> {
    factory: F,
    analyzer: Option<Box<dyn FaceAnalyzer>>,
    swapper: Option<Box<dyn FaceSwapper>>,
    /// Cached enhancer together with the upscale factor it was built for.
    enhancer: Option<(u32, Box<dyn FaceEnhancer>)>,
}

impl<F: AdapterFactory> SessionManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            analyzer: None,
            swapper: None,
            enhancer: None,
        }
    }

    /// Detection + recognition adapter.
    pub fn analyzer(&mut self) -> Result<&mut dyn FaceAnalyzer> {
        let analyzer = match self.analyzer.take() {
            Some(analyzer) => analyzer,
            None => {
                tracing::info!("creating face analyzer");
                self.factory.create_analyzer()?
            }
        };
        Ok(self.analyzer.insert(analyzer).as_mut())
    }

    /// Identity-conditioned swap adapter.
    pub fn swapper(&mut self) -> Result<&mut dyn FaceSwapper> {
        let swapper = match self.swapper.take() {
            Some(swapper) => swapper,
            None => {
                tracing::info!("creating face swapper");
                self.factory.create_swapper()?
            }
        };
        Ok(self.swapper.insert(swapper).as_mut())
    }

    /// Restoration adapter for `upscale`. A cached enhancer built for another
    /// factor is dropped before the replacement is created.
    pub fn enhancer(&mut self, upscale: u32) -> Result<&mut dyn FaceEnhancer> {
        let enhancer = match self.enhancer.take() {
            Some((cached, enhancer)) if cached == upscale => enhancer,
            stale => {
                if let Some((cached, _)) = stale {
                    tracing::info!(from = cached, to = upscale, "upscale changed; recreating enhancer");
                }
                tracing::info!(upscale, "creating face enhancer");
                self.factory.create_enhancer(upscale)?
            }
        };
        let (_, enhancer) = self.enhancer.insert((upscale, enhancer));
        Ok(enhancer.as_mut())
    }

    pub fn is_loaded(&self, kind: AdapterKind) -> bool {
        match kind {
            AdapterKind::Analyzer => self.analyzer.is_some(),
            AdapterKind::Swapper => self.swapper.is_some(),
            AdapterKind::Enhancer => self.enhancer.is_some(),
        }
    }

    /// Drop one cached adapter, releasing its sessions.
    pub fn evict(&mut self, kind: AdapterKind) {
        tracing::debug!(?kind, "evicting adapter");
        match kind {
            AdapterKind::Analyzer => self.analyzer = None,
            AdapterKind::Swapper => self.swapper = None,
            AdapterKind::Enhancer => self.enhancer = None,
        }
    }

    /// Drop every cached adapter.
    pub fn clear(&mut self) {
        self.analyzer = None;
        self.swapper = None;
        self.enhancer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::testing::FakeFactory;

    #[test]
    fn test_adapters_created_once_and_reused() {
        let factory = FakeFactory::default();
        let counters = factory.counters.clone();
        let mut sessions = SessionManager::new(factory);

        sessions.analyzer().unwrap();
        sessions.analyzer().unwrap();
        sessions.swapper().unwrap();
        sessions.swapper().unwrap();

        assert_eq!(counters.analyzers.get(), 1);
        assert_eq!(counters.swappers.get(), 1);
        assert!(sessions.is_loaded(AdapterKind::Analyzer));
        assert!(!sessions.is_loaded(AdapterKind::Enhancer));
    }

    #[test]
    fn test_enhancer_recreated_when_upscale_changes() {
        let factory = FakeFactory::default();
        let counters = factory.counters.clone();
        let mut sessions = SessionManager::new(factory);

        assert_eq!(sessions.enhancer(1).unwrap().upscale(), 1);
        assert_eq!(sessions.enhancer(1).unwrap().upscale(), 1);
        assert_eq!(counters.enhancers.get(), 1);

        assert_eq!(sessions.enhancer(2).unwrap().upscale(), 2);
        assert_eq!(counters.enhancers.get(), 2);

        sessions.enhancer(2).unwrap();
        assert_eq!(counters.enhancers.get(), 2);
    }

    #[test]
    fn test_evict_forces_recreation() {
        let factory = FakeFactory::default();
        let counters = factory.counters.clone();
        let mut sessions = SessionManager::new(factory);

        sessions.analyzer().unwrap();
        sessions.evict(AdapterKind::Analyzer);
        assert!(!sessions.is_loaded(AdapterKind::Analyzer));
        sessions.analyzer().unwrap();
        assert_eq!(counters.analyzers.get(), 2);

        sessions.clear();
        assert!(!sessions.is_loaded(AdapterKind::Analyzer));
    }

    #[test]
    fn test_missing_model_surfaces_at_creation() {
        let factory = FakeFactory {
            missing_enhancer: true,
            ..FakeFactory::default()
        };
        let mut sessions = SessionManager::new(factory);

        let err = sessions.enhancer(1).map(|_| ()).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceNotFound(_)));
        assert!(!sessions.is_loaded(AdapterKind::Enhancer));
    }
}
