/// Hardware revisions of the wall display panel. Resolved once at startup from
/// the reported model string; everything capability-dependent (proximity
/// sensor, relay count, temperature calibration) comes out of this table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceModel {
    Stargate,
    Atlantis,
    Pegasus,
    Blake,
    Maverick,
    Jenna,
    Cally,
}

pub struct ModelProfile {
    pub name: &'static str,
    pub code: &'static str,
    pub has_proximity_sensor: bool,
    pub temperature_offset: f32,
    pub humidity_offset: f32,
    pub relays: usize,
    pub buttons: usize,
    /// Farthest distance the proximity sensor reports, in centimeters.
    pub proximity_range: f32,
}

impl DeviceModel {
    pub const ALL: [DeviceModel; 7] = [
        DeviceModel::Stargate,
        DeviceModel::Atlantis,
        DeviceModel::Pegasus,
        DeviceModel::Blake,
        DeviceModel::Maverick,
        DeviceModel::Jenna,
        DeviceModel::Cally,
    ];

    pub const fn profile(&self) -> &'static ModelProfile {
        match self {
            DeviceModel::Stargate => &ModelProfile {
                name: "Stargate",
                code: "SAWD-0A1XX10EU1",
                has_proximity_sensor: false,
                temperature_offset: -2.7,
                humidity_offset: 7.0,
                relays: 1,
                buttons: 1,
                proximity_range: 8.0,
            },
            DeviceModel::Atlantis => &ModelProfile {
                name: "Atlantis",
                code: "SAWD-1A1XX10EU1",
                has_proximity_sensor: true,
                temperature_offset: -1.1,
                humidity_offset: 3.0,
                relays: 1,
                buttons: 1,
                proximity_range: 8.0,
            },
            DeviceModel::Pegasus => &ModelProfile {
                name: "Pegasus",
                code: "SAWD-2A1XX10EU1",
                has_proximity_sensor: true,
                temperature_offset: -2.6,
                humidity_offset: 8.0,
                relays: 2,
                buttons: 2,
                proximity_range: 8.0,
            },
            DeviceModel::Blake => &ModelProfile {
                name: "Blake",
                code: "SAWD-3A1XE10EU2",
                has_proximity_sensor: true,
                temperature_offset: -1.2,
                humidity_offset: 10.0,
                relays: 2,
                buttons: 2,
                proximity_range: 8.0,
            },
            DeviceModel::Maverick => &ModelProfile {
                name: "Maverick",
                code: "SAWD-4A1XE10US0",
                has_proximity_sensor: true,
                temperature_offset: 0.0,
                humidity_offset: 0.0,
                relays: 1,
                buttons: 1,
                proximity_range: 8.0,
            },
            DeviceModel::Jenna => &ModelProfile {
                name: "Jenna",
                code: "SAWD-5A1XX10EU0",
                has_proximity_sensor: true,
                temperature_offset: 0.0,
                humidity_offset: 0.0,
                relays: 1,
                buttons: 1,
                proximity_range: 8.0,
            },
            DeviceModel::Cally => &ModelProfile {
                name: "Cally",
                code: "SAWD-6A1XX10EU0",
                has_proximity_sensor: true,
                temperature_offset: 0.0,
                humidity_offset: 0.0,
                relays: 1,
                buttons: 1,
                proximity_range: 8.0,
            },
        }
    }

    /// Looks a model up by its reported name or hardware code. Unknown or
    /// missing identities fall back to the oldest revision.
    pub fn detect(identity: Option<&str>) -> Self {
        let Some(identity) = identity else {
            return DeviceModel::Stargate;
        };

        Self::ALL
            .into_iter()
            .find(|model| {
                let profile = model.profile();
                profile.name.eq_ignore_ascii_case(identity) || profile.code == identity
            })
            .unwrap_or(DeviceModel::Stargate)
    }
}
