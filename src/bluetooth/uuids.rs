/// GATT identifiers exposed by the Aranet4
use bluer::Uuid;

pub const DEVICE_SERVICE: Uuid = Uuid::from_u128(0xf0cd1400_95da_4f4b_9ac8_aa55d312af0c);
pub const WRITE_CMD: Uuid = Uuid::from_u128(0xf0cd1402_95da_4f4b_9ac8_aa55d312af0c);
pub const READ_ALL: Uuid = Uuid::from_u128(0xf0cd3001_95da_4f4b_9ac8_aa55d312af0c);
pub const READ_TOTAL_READINGS: Uuid = Uuid::from_u128(0xf0cd2001_95da_4f4b_9ac8_aa55d312af0c);
pub const READ_INTERVAL: Uuid = Uuid::from_u128(0xf0cd2002_95da_4f4b_9ac8_aa55d312af0c);
pub const READ_TIME_SERIES: Uuid = Uuid::from_u128(0xf0cd2003_95da_4f4b_9ac8_aa55d312af0c);
pub const READ_SECONDS_SINCE_UPDATE: Uuid =
    Uuid::from_u128(0xf0cd2004_95da_4f4b_9ac8_aa55d312af0c);

// Standard Bluetooth SIG services
pub const GENERIC_ACCESS_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const GENERIC_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const DEVICE_INFO_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const DEVICE_INFO_SW_REVISION: Uuid = Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);
