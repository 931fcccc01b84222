// JSON archive layout
pub const METADATA_FILE: &str = "metadata.json";
pub const USER_TYPES_FILE: &str = "userTypes.json";
pub const VEHICLES_FILE: &str = "vehicles.json";
pub const EVENT_RECORDS_FILE: &str = "eventRecords.json";
pub const FILLUP_RECORDS_FILE: &str = "fillupRecords.json";
pub const PHOTOS_PREFIX: &str = "photos/";

// XML backup layout
pub const EVENT_SUBTYPES_XML: &str = "event-subtypes.xml";
pub const FUEL_TYPES_XML: &str = "fuel-types.xml";
pub const TRIP_TYPES_XML: &str = "trip-types.xml";
pub const VEHICLES_XML: &str = "vehicles.xml";

// XML tag names, already normalized to camelCase
pub const VEHICLES_TAG: &str = "vehicles";
pub const VEHICLE_TAG: &str = "vehicle";
pub const FILLUP_RECORDS_TAG: &str = "fillupRecords";
pub const FILLUP_RECORD_TAG: &str = "fillupRecord";
pub const EVENT_RECORDS_TAG: &str = "eventRecords";
pub const EVENT_RECORD_TAG: &str = "eventRecord";
pub const EVENT_SUBTYPES_TAG: &str = "eventSubtypes";
pub const EVENT_SUBTYPE_TAG: &str = "eventSubtype";
pub const FUEL_TYPES_TAG: &str = "fuelTypes";
pub const FUEL_TYPE_TAG: &str = "fuelType";
pub const TRIP_TYPES_TAG: &str = "tripTypes";
pub const TRIP_TYPE_TAG: &str = "tripType";

// Storage error labels
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

// Temporary extraction directories
pub const TEMP_DIR_PREFIX: &str = "fuel-backup-";
