//! Model resolution repository
//!
//! For every reactor and every model kind there is a three-level hierarchy:
//! an optional reactor-level model, optional plate-level models, and optional
//! sensor-level models. Resolution returns the most specific model available
//! for a sensor — sensor level first, then the sensor's plate, then the
//! reactor. Coarser models exist precisely to cover sensors without enough
//! individual history, so a sensor-specific model always wins.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{PredictError, PredictResult};
use crate::models::loader::ArtifactStore;
use crate::models::{Encode, HorizonModels, TrendSpec};
use crate::topology::Reactor;

/// One model kind's three-level lookup chain.
struct Hierarchy<M: ?Sized> {
    reactor_level: Option<Arc<M>>,
    plate_level: HashMap<String, Option<Arc<M>>>,
    sensor_level: HashMap<String, Option<Arc<M>>>,
}

impl<M: ?Sized> Hierarchy<M> {
    fn build<F>(reactor: &Reactor, mut load: F) -> PredictResult<Self>
    where
        F: FnMut(&str) -> PredictResult<Option<Arc<M>>>,
    {
        let reactor_level = load(reactor.name())?;
        let mut plate_level = HashMap::new();
        let mut sensor_level = HashMap::new();
        for plate in reactor.plates() {
            plate_level.insert(plate.name().to_string(), load(plate.name())?);
            for sensor in plate.sensors() {
                sensor_level.insert(sensor.to_string(), load(sensor)?);
            }
        }
        Ok(Self {
            reactor_level,
            plate_level,
            sensor_level,
        })
    }

    /// Most specific model for a sensor seated on `plate`.
    fn resolve(&self, plate: &str, sensor: &str) -> Option<Arc<M>> {
        if let Some(Some(model)) = self.sensor_level.get(sensor) {
            return Some(Arc::clone(model));
        }
        if let Some(Some(model)) = self.plate_level.get(plate) {
            return Some(Arc::clone(model));
        }
        self.reactor_level.as_ref().map(Arc::clone)
    }
}

struct ReactorModels {
    sensor_plate: HashMap<String, String>,
    encoders: Hierarchy<dyn Encode>,
    trends: Hierarchy<TrendSpec>,
    predictions: Hierarchy<HorizonModels>,
}

/// Indexes every pre-loaded model artifact, keyed reactor → plate → sensor.
/// Built once at startup; resolution afterwards is a pure read.
pub struct ModelRepository {
    reactors: HashMap<String, ReactorModels>,
}

impl std::fmt::Debug for ModelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRepository")
            .field("reactors", &self.reactors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelRepository {
    /// Load the full hierarchy for every reactor from the artifact store.
    pub fn build(reactors: &[Reactor], store: &dyn ArtifactStore) -> PredictResult<Self> {
        let mut loaded = HashMap::new();
        for reactor in reactors {
            let name = reactor.name();
            let mut sensor_plate = HashMap::new();
            for plate in reactor.plates() {
                for sensor in plate.sensors() {
                    sensor_plate.insert(sensor.to_string(), plate.name().to_string());
                }
            }
            let models = ReactorModels {
                sensor_plate,
                encoders: Hierarchy::build(reactor, |scope| store.load_encoder(name, scope))?,
                trends: Hierarchy::build(reactor, |scope| store.load_trend(name, scope))?,
                predictions: Hierarchy::build(reactor, |scope| {
                    store.load_prediction(name, scope)
                })?,
            };
            debug!(reactor = name, "Model hierarchy loaded");
            loaded.insert(name.to_string(), models);
        }
        Ok(Self { reactors: loaded })
    }

    fn entry<'a>(
        &'a self,
        reactor: &str,
        sensor: &str,
    ) -> PredictResult<(&'a ReactorModels, &'a str)> {
        let models = self.reactors.get(reactor).ok_or_else(|| {
            PredictError::Common(rcm_common::Error::NotFound(format!("reactor {}", reactor)))
        })?;
        let plate = models
            .sensor_plate
            .get(sensor)
            .ok_or_else(|| PredictError::UnknownSensor {
                reactor: reactor.to_string(),
                sensor: sensor.to_string(),
            })?;
        Ok((models, plate))
    }

    /// Most specific encoder model for a sensor.
    pub fn encoder(&self, reactor: &str, sensor: &str) -> PredictResult<Arc<dyn Encode>> {
        let (models, plate) = self.entry(reactor, sensor)?;
        models
            .encoders
            .resolve(plate, sensor)
            .ok_or_else(|| missing(reactor, sensor, "encoder"))
    }

    /// Most specific trend model for a sensor.
    pub fn trend(&self, reactor: &str, sensor: &str) -> PredictResult<Arc<TrendSpec>> {
        let (models, plate) = self.entry(reactor, sensor)?;
        models
            .trends
            .resolve(plate, sensor)
            .ok_or_else(|| missing(reactor, sensor, "trend"))
    }

    /// Most specific per-horizon prediction models for a sensor.
    pub fn prediction(&self, reactor: &str, sensor: &str) -> PredictResult<Arc<HorizonModels>> {
        let (models, plate) = self.entry(reactor, sensor)?;
        models
            .predictions
            .resolve(plate, sensor)
            .ok_or_else(|| missing(reactor, sensor, "prediction"))
    }
}

fn missing(reactor: &str, sensor: &str, kind: &'static str) -> PredictError {
    PredictError::MissingModel {
        reactor: reactor.to_string(),
        sensor: sensor.to_string(),
        kind,
    }
}
