//! Reactor topology
//!
//! Static description of a reactor's plate stack and sensor positions,
//! built once from configuration. Plates are listed top to bottom; every
//! plate carries a fixed array of four angular slots (0°, 90°, 180°, 270°),
//! some of which may be vacant. All queries are pure lookups.

use rcm_common::config::{PlateConfig, ReactorConfig, ANGLE_SLOTS};

use crate::error::{PredictError, PredictResult};

/// Canonical angular positions of the sensor slots, in slot order.
pub const ANGLES: [u16; ANGLE_SLOTS] = [0, 90, 180, 270];

/// One structural shelf of the reactor.
#[derive(Debug, Clone)]
pub struct Plate {
    name: String,
    slots: Vec<Option<String>>,
}

impl Plate {
    fn from_config(config: &PlateConfig) -> Self {
        Self {
            name: config.name.clone(),
            slots: config
                .slots
                .iter()
                .map(|s| if s.is_empty() { None } else { Some(s.clone()) })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Occupied slots in slot order.
    pub fn sensors(&self) -> Vec<&str> {
        self.slots.iter().flatten().map(String::as_str).collect()
    }

    pub fn holds(&self, sensor_id: &str) -> bool {
        self.slots.iter().flatten().any(|s| s == sensor_id)
    }

    /// One-hot vector over the canonical angle ordering for a seated sensor.
    pub fn angle_vector(&self, sensor_id: &str) -> Option<[f64; ANGLE_SLOTS]> {
        let slot = self
            .slots
            .iter()
            .position(|s| s.as_deref() == Some(sensor_id))?;
        let mut one_hot = [0.0; ANGLE_SLOTS];
        one_hot[slot] = 1.0;
        Some(one_hot)
    }
}

/// A reactor's full topology: named, ordered plate stack.
#[derive(Debug, Clone)]
pub struct Reactor {
    name: String,
    plates: Vec<Plate>,
}

impl Reactor {
    /// Build from static configuration, checking the one-plate-per-sensor
    /// invariant.
    pub fn from_config(config: &ReactorConfig) -> PredictResult<Self> {
        let reactor = Self {
            name: config.name.clone(),
            plates: config.plates.iter().map(Plate::from_config).collect(),
        };
        let mut seen: Vec<&str> = Vec::new();
        for plate in &reactor.plates {
            for sensor in plate.sensors() {
                if seen.contains(&sensor) {
                    return Err(PredictError::InvalidConfiguration(format!(
                        "sensor {} appears on more than one plate of reactor {}",
                        sensor, reactor.name
                    )));
                }
                seen.push(sensor);
            }
        }
        Ok(reactor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plate stack, top to bottom.
    pub fn plates(&self) -> &[Plate] {
        &self.plates
    }

    pub fn plate(&self, plate_name: &str) -> PredictResult<&Plate> {
        self.plates
            .iter()
            .find(|p| p.name() == plate_name)
            .ok_or_else(|| PredictError::UnknownPlate {
                reactor: self.name.clone(),
                plate: plate_name.to_string(),
            })
    }

    /// Plate owning the sensor.
    pub fn find_plate(&self, sensor_id: &str) -> PredictResult<&Plate> {
        self.plates
            .iter()
            .find(|p| p.holds(sensor_id))
            .ok_or_else(|| PredictError::UnknownSensor {
                reactor: self.name.clone(),
                sensor: sensor_id.to_string(),
            })
    }

    fn plate_position(&self, plate_name: &str) -> PredictResult<usize> {
        self.plates
            .iter()
            .position(|p| p.name() == plate_name)
            .ok_or_else(|| PredictError::UnknownPlate {
                reactor: self.name.clone(),
                plate: plate_name.to_string(),
            })
    }

    /// Vertically adjacent plate above, `None` at the top of the stack.
    pub fn plate_above(&self, plate_name: &str) -> PredictResult<Option<&Plate>> {
        let pos = self.plate_position(plate_name)?;
        Ok(if pos > 0 { Some(&self.plates[pos - 1]) } else { None })
    }

    /// Vertically adjacent plate below, `None` at the bottom of the stack.
    pub fn plate_below(&self, plate_name: &str) -> PredictResult<Option<&Plate>> {
        let pos = self.plate_position(plate_name)?;
        Ok(self.plates.get(pos + 1))
    }

    /// One-hot angle vector for a sensor seated on the named plate.
    pub fn angle_vector(
        &self,
        plate_name: &str,
        sensor_id: &str,
    ) -> PredictResult<[f64; ANGLE_SLOTS]> {
        self.plate(plate_name)?
            .angle_vector(sensor_id)
            .ok_or_else(|| PredictError::UnknownSensor {
                reactor: self.name.clone(),
                sensor: sensor_id.to_string(),
            })
    }

    /// Every sensor in the reactor, in deterministic stack/slot order.
    pub fn all_sensors(&self) -> Vec<String> {
        self.plates
            .iter()
            .flat_map(|p| p.sensors().into_iter().map(str::to_string))
            .collect()
    }

    /// Reduced view of the reactor with the given sensors unseated.
    pub fn exclude_sensors(&self, excluded: &[String]) -> Reactor {
        let plates = self
            .plates
            .iter()
            .map(|plate| Plate {
                name: plate.name.clone(),
                slots: plate
                    .slots
                    .iter()
                    .map(|slot| {
                        slot.clone()
                            .filter(|sensor| !excluded.contains(sensor))
                    })
                    .collect(),
            })
            .collect();
        Reactor {
            name: self.name.clone(),
            plates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_plate_reactor() -> Reactor {
        let config = ReactorConfig {
            name: "R-301".to_string(),
            plates: vec![
                PlateConfig {
                    name: "9".to_string(),
                    slots: vec![
                        "T911".to_string(),
                        "T912".to_string(),
                        "T913".to_string(),
                        "".to_string(),
                    ],
                },
                PlateConfig {
                    name: "8".to_string(),
                    slots: vec![
                        "T811".to_string(),
                        "".to_string(),
                        "T813".to_string(),
                        "T814".to_string(),
                    ],
                },
            ],
        };
        Reactor::from_config(&config).unwrap()
    }

    #[test]
    fn test_find_plate_is_unique_owner() {
        let reactor = two_plate_reactor();
        for sensor in reactor.all_sensors() {
            let plate = reactor.find_plate(&sensor).unwrap();
            assert!(plate.holds(&sensor));
            let owners = reactor
                .plates()
                .iter()
                .filter(|p| p.holds(&sensor))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_unknown_sensor_rejected() {
        let reactor = two_plate_reactor();
        assert!(matches!(
            reactor.find_plate("T999"),
            Err(PredictError::UnknownSensor { .. })
        ));
    }

    #[test]
    fn test_above_below_are_inverse() {
        let reactor = two_plate_reactor();
        let above = reactor.plate_above("8").unwrap().unwrap();
        assert_eq!(above.name(), "9");
        let below = reactor.plate_below(above.name()).unwrap().unwrap();
        assert_eq!(below.name(), "8");

        assert!(reactor.plate_above("9").unwrap().is_none());
        assert!(reactor.plate_below("8").unwrap().is_none());
        assert!(matches!(
            reactor.plate_above("7"),
            Err(PredictError::UnknownPlate { .. })
        ));
    }

    #[test]
    fn test_angle_vector_one_hot() {
        let reactor = two_plate_reactor();
        assert_eq!(
            reactor.angle_vector("8", "T813").unwrap(),
            [0.0, 0.0, 1.0, 0.0]
        );
        // vacant slot does not shift positions
        assert_eq!(
            reactor.angle_vector("8", "T814").unwrap(),
            [0.0, 0.0, 0.0, 1.0]
        );
        assert!(reactor.angle_vector("8", "T911").is_err());
    }

    #[test]
    fn test_all_sensors_stack_order() {
        let reactor = two_plate_reactor();
        assert_eq!(
            reactor.all_sensors(),
            vec!["T911", "T912", "T913", "T811", "T813", "T814"]
        );
    }

    #[test]
    fn test_exclude_sensors_view() {
        let reactor = two_plate_reactor();
        let reduced = reactor.exclude_sensors(&["T912".to_string(), "T814".to_string()]);
        assert_eq!(reduced.all_sensors(), vec!["T911", "T913", "T811", "T813"]);
        assert!(matches!(
            reduced.find_plate("T912"),
            Err(PredictError::UnknownSensor { .. })
        ));
        // the full topology is untouched
        assert!(reactor.find_plate("T912").is_ok());
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let config = ReactorConfig {
            name: "R-301".to_string(),
            plates: vec![
                PlateConfig {
                    name: "9".to_string(),
                    slots: vec!["T1".into(), "".into(), "".into(), "".into()],
                },
                PlateConfig {
                    name: "8".to_string(),
                    slots: vec!["T1".into(), "".into(), "".into(), "".into()],
                },
            ],
        };
        assert!(matches!(
            Reactor::from_config(&config),
            Err(PredictError::InvalidConfiguration(_))
        ));
    }
}
