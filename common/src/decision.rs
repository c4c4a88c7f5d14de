use crate::types::{ThermostatMode, ThermostatState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub state: ThermostatState,
    pub energized: bool,
    pub changed: bool,
}

// Single-setpoint decision, no deadband.
//
// Heating wins when the room is strictly colder than the target in heat
// mode, cooling when it is strictly warmer in cool mode; anything else
// (including NaN on either side) resolves to off.
pub fn decide(
    target_mode: ThermostatMode,
    target_temp: f32,
    current_temp: f32,
    current_state: ThermostatState,
) -> Decision {
    let state = match target_mode {
        ThermostatMode::Heat if current_temp < target_temp => ThermostatState::Heating,
        ThermostatMode::Cool if current_temp > target_temp => ThermostatState::Cooling,
        _ => ThermostatState::Off,
    };

    Decision {
        state,
        energized: state.is_energized(),
        changed: state != current_state,
    }
}
