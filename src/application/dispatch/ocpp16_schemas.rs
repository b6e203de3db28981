//! OCPP 1.6-J message schemas
//!
//! Requests the charger sends are closed objects, as in the published
//! OCPP 1.6 JSON schemas. Responses to our own commands are checked for the
//! fields we read and otherwise left open.

use super::schema::{FieldType, Schema, SchemaRegistry};

const STOP_REASONS: &[&str] = &[
    "EmergencyStop",
    "EVDisconnected",
    "HardReset",
    "Local",
    "Other",
    "PowerLoss",
    "Reboot",
    "Remote",
    "SoftReset",
    "UnlockCommand",
    "DeAuthorized",
];

const CHARGE_POINT_ERROR_CODES: &[&str] = &[
    "ConnectorLockFailure",
    "EVCommunicationError",
    "GroundFailure",
    "HighTemperature",
    "InternalError",
    "LocalListConflict",
    "NoError",
    "OtherError",
    "OverCurrentFailure",
    "PowerMeterFailure",
    "PowerSwitchFailure",
    "ReaderFailure",
    "ResetFailure",
    "UnderVoltage",
    "OverVoltage",
    "WeakSignal",
];

const CHARGE_POINT_STATUSES: &[&str] = &[
    "Available",
    "Preparing",
    "Charging",
    "SuspendedEVSE",
    "SuspendedEV",
    "Finishing",
    "Reserved",
    "Unavailable",
    "Faulted",
];

const READING_CONTEXTS: &[&str] = &[
    "Interruption.Begin",
    "Interruption.End",
    "Sample.Clock",
    "Sample.Periodic",
    "Transaction.Begin",
    "Transaction.End",
    "Trigger",
    "Other",
];

const VALUE_FORMATS: &[&str] = &["Raw", "SignedData"];

const MEASURANDS: &[&str] = &[
    "Energy.Active.Export.Register",
    "Energy.Active.Import.Register",
    "Energy.Reactive.Export.Register",
    "Energy.Reactive.Import.Register",
    "Energy.Active.Export.Interval",
    "Energy.Active.Import.Interval",
    "Energy.Reactive.Export.Interval",
    "Energy.Reactive.Import.Interval",
    "Power.Active.Export",
    "Power.Active.Import",
    "Power.Offered",
    "Power.Reactive.Export",
    "Power.Reactive.Import",
    "Power.Factor",
    "Current.Import",
    "Current.Export",
    "Current.Offered",
    "Voltage",
    "Frequency",
    "Temperature",
    "SoC",
    "RPM",
];

const PHASES: &[&str] = &[
    "L1", "L2", "L3", "N", "L1-N", "L2-N", "L3-N", "L1-L2", "L2-L3", "L3-L1",
];

const LOCATIONS: &[&str] = &["Cable", "EV", "Inlet", "Outlet", "Body"];

const UNITS: &[&str] = &[
    "Wh",
    "kWh",
    "varh",
    "kvarh",
    "W",
    "kW",
    "VA",
    "kVA",
    "var",
    "kvar",
    "A",
    "V",
    "K",
    "Celcius",
    "Celsius",
    "Fahrenheit",
    "Percent",
];

const REMOTE_START_STOP_STATUSES: &[&str] = &["Accepted", "Rejected"];
const CHARGING_PROFILE_STATUSES: &[&str] = &["Accepted", "Rejected", "NotSupported"];
const CONFIGURATION_STATUSES: &[&str] = &["Accepted", "Rejected", "RebootRequired", "NotSupported"];

fn meter_value() -> FieldType {
    let sampled_value = Schema::object()
        .required("value", FieldType::any_string())
        .optional("context", FieldType::Enum(READING_CONTEXTS))
        .optional("format", FieldType::Enum(VALUE_FORMATS))
        .optional("measurand", FieldType::Enum(MEASURANDS))
        .optional("phase", FieldType::Enum(PHASES))
        .optional("location", FieldType::Enum(LOCATIONS))
        .optional("unit", FieldType::Enum(UNITS))
        .closed();

    FieldType::Object(
        Schema::object()
            .required("timestamp", FieldType::DateTime)
            .required(
                "sampledValue",
                FieldType::array_of(FieldType::Object(sampled_value)),
            )
            .closed(),
    )
}

fn boot_notification() -> Schema {
    Schema::object()
        .required("chargePointVendor", FieldType::string(20))
        .required("chargePointModel", FieldType::string(20))
        .optional("chargePointSerialNumber", FieldType::string(25))
        .optional("chargeBoxSerialNumber", FieldType::string(25))
        .optional("firmwareVersion", FieldType::string(50))
        .optional("iccid", FieldType::string(20))
        .optional("imsi", FieldType::string(20))
        .optional("meterType", FieldType::string(25))
        .optional("meterSerialNumber", FieldType::string(25))
        .closed()
}

fn start_transaction() -> Schema {
    Schema::object()
        .required("connectorId", FieldType::Integer)
        .required("idTag", FieldType::string(20))
        .required("meterStart", FieldType::Integer)
        .optional("reservationId", FieldType::Integer)
        .required("timestamp", FieldType::DateTime)
        .closed()
}

fn stop_transaction() -> Schema {
    Schema::object()
        .optional("idTag", FieldType::string(20))
        .required("meterStop", FieldType::Integer)
        .required("timestamp", FieldType::DateTime)
        .required("transactionId", FieldType::Integer)
        .optional("reason", FieldType::Enum(STOP_REASONS))
        .optional("transactionData", FieldType::array_of(meter_value()))
        .closed()
}

fn status_notification() -> Schema {
    Schema::object()
        .required("connectorId", FieldType::Integer)
        .required("errorCode", FieldType::Enum(CHARGE_POINT_ERROR_CODES))
        .optional("info", FieldType::string(50))
        .required("status", FieldType::Enum(CHARGE_POINT_STATUSES))
        .optional("timestamp", FieldType::DateTime)
        .optional("vendorId", FieldType::string(255))
        .optional("vendorErrorCode", FieldType::string(50))
        .closed()
}

fn meter_values() -> Schema {
    Schema::object()
        .required("connectorId", FieldType::Integer)
        .optional("transactionId", FieldType::Integer)
        .required("meterValue", FieldType::array_of(meter_value()))
        .closed()
}

fn status_response(allowed: &'static [&'static str]) -> Schema {
    Schema::object().required("status", FieldType::Enum(allowed))
}

fn get_configuration_response() -> Schema {
    let key_value = Schema::object()
        .required("key", FieldType::string(50))
        .required("readonly", FieldType::Boolean)
        .optional("value", FieldType::string(500));

    Schema::object()
        .optional(
            "configurationKey",
            FieldType::array_of(FieldType::Object(key_value)),
        )
        .optional("unknownKey", FieldType::array_of(FieldType::string(50)))
}

/// Every schema this server knows, for incoming requests and for the
/// answers to its own commands.
pub fn ocpp16_schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_request("BootNotification", boot_notification())
        .with_request("Heartbeat", Schema::object().closed())
        .with_request(
            "Authorize",
            Schema::object()
                .required("idTag", FieldType::string(20))
                .closed(),
        )
        .with_request("StartTransaction", start_transaction())
        .with_request("StopTransaction", stop_transaction())
        .with_request("StatusNotification", status_notification())
        .with_request("MeterValues", meter_values())
        .with_response(
            "RemoteStartTransaction",
            status_response(REMOTE_START_STOP_STATUSES),
        )
        .with_response(
            "RemoteStopTransaction",
            status_response(REMOTE_START_STOP_STATUSES),
        )
        .with_response(
            "SetChargingProfile",
            status_response(CHARGING_PROFILE_STATUSES),
        )
        .with_response(
            "ChangeConfiguration",
            status_response(CONFIGURATION_STATUSES),
        )
        .with_response("GetConfiguration", get_configuration_response())
}
