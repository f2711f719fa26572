/// Joint power state of the panel. `screen_on` and `in_screen_saver` are owned
/// by the idle state machine, `keep_alive` by the external override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerState {
    pub screen_on: bool,
    pub in_screen_saver: bool,
    pub keep_alive: bool,
}

impl Default for PowerState {
    fn default() -> Self {
        Self {
            screen_on: true,
            in_screen_saver: false,
            keep_alive: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetReason {
    AutomaticLux,
    FixedPreference,
    ScreenOff,
    Screensaver,
}

/// The brightness the controller wants to reach. The applied value trails this
/// through the animated transition, so both are tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrightnessTarget {
    pub value: u8,
    pub reason: TargetReason,
}
