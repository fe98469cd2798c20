// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Outgoing command templates
//!
//! Each template lists the fields a command carries, their default bytes and
//! optional aliases (`msb`, `lsb`, `group`...) used when filling them in.
//! The table is data: device families with extra commands register their
//! own templates on top of [`CommandSchema::generic`].

use std::collections::HashMap;

use crate::error::SchemaError;
use crate::protocol::{
    Field, LengthClass, MessageType, CMD_ENGINE_VERSION, CMD_ENTER_LINK_MODE, CMD_EXTENDED_ALDB,
    CMD_ID_REQUEST, CMD_OFF, CMD_ON, CMD_PEEK_ONE_BYTE, CMD_PRODUCT_DATA, CMD_SET_ADDRESS_MSB,
    CMD_STATUS_REQUEST, MODEM_START_LINKING,
};

/// Who a command is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateTarget {
    /// An Insteon device, relayed by the modem
    Device,
    /// The modem itself
    Modem,
}

/// One field of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// The field
    pub field: Field,
    /// Byte used when the caller does not override it
    pub default: u8,
    /// Alternative name accepted when overriding
    pub alias: Option<&'static str>,
}

/// Template for one outgoing command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    /// Command name
    pub name: String,
    /// Device or modem
    pub target: TemplateTarget,
    /// Insteon message type (`None` for modem commands)
    pub message_type: Option<MessageType>,
    /// Standard or extended
    pub length: LengthClass,
    /// Completed in two phases: an ack, then a follow-up message
    pub two_phase: bool,
    /// Fields with defaults, in declaration order
    pub fields: Vec<FieldSpec>,
}

impl CommandTemplate {
    /// Start a direct device command
    pub fn direct(name: impl Into<String>, length: LengthClass) -> Self {
        let mut template = Self {
            name: name.into(),
            target: TemplateTarget::Device,
            message_type: Some(MessageType::Direct),
            length,
            two_phase: false,
            fields: Vec::new(),
        };
        template = template.field(Field::Cmd1, 0x00).field(Field::Cmd2, 0x00);
        if length == LengthClass::Extended {
            for n in 1..=14 {
                template = template.field(Field::Usr(n), 0x00);
            }
        }
        template
    }

    /// Start an all-link cleanup command
    pub fn cleanup(name: impl Into<String>) -> Self {
        Self {
            message_type: Some(MessageType::AllLinkCleanup),
            ..Self::direct(name, LengthClass::Standard)
        }
    }

    /// Start a modem command
    pub fn modem(name: impl Into<String>, modem_cmd: u8) -> Self {
        Self {
            name: name.into(),
            target: TemplateTarget::Modem,
            message_type: None,
            length: LengthClass::Standard,
            two_phase: false,
            fields: vec![FieldSpec {
                field: Field::ModemCmd,
                default: modem_cmd,
                alias: None,
            }],
        }
    }

    /// Set a field default, adding the field if needed
    pub fn field(self, field: Field, default: u8) -> Self {
        self.spec(field, default, None)
    }

    /// Set a field default and give it an alias
    pub fn aliased(self, field: Field, default: u8, alias: &'static str) -> Self {
        self.spec(field, default, Some(alias))
    }

    /// Mark the command as two-phase
    pub fn two_phase(mut self) -> Self {
        self.two_phase = true;
        self
    }

    fn spec(mut self, field: Field, default: u8, alias: Option<&'static str>) -> Self {
        match self.fields.iter_mut().find(|s| s.field == field) {
            Some(spec) => {
                spec.default = default;
                if alias.is_some() {
                    spec.alias = alias;
                }
            }
            None => self.fields.push(FieldSpec {
                field,
                default,
                alias,
            }),
        }
        self
    }

    /// Resolve a field name or alias against this template
    pub fn resolve(&self, name: &str) -> Result<Field, SchemaError> {
        if let Some(spec) = self.fields.iter().find(|s| s.alias == Some(name)) {
            return Ok(spec.field);
        }
        match Field::from_name(name) {
            Some(field) if self.fields.iter().any(|s| s.field == field) => Ok(field),
            _ => Err(SchemaError::UnknownField {
                command: self.name.clone(),
                field: name.to_string(),
            }),
        }
    }

    /// Default value of a field
    pub fn default_of(&self, field: Field) -> Option<u8> {
        self.fields
            .iter()
            .find(|s| s.field == field)
            .map(|s| s.default)
    }
}

/// Registry of command templates keyed by name
#[derive(Debug, Clone, Default)]
pub struct CommandSchema {
    templates: HashMap<String, CommandTemplate>,
}

impl CommandSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// The generic command set understood by every device
    pub fn generic() -> Self {
        let std = LengthClass::Standard;
        let ext = LengthClass::Extended;
        let mut schema = Self::new();

        schema.register(
            CommandTemplate::direct("product_data_request", std)
                .field(Field::Cmd1, CMD_PRODUCT_DATA),
        );
        schema.register(
            CommandTemplate::direct("enter_link_mode", ext)
                .field(Field::Cmd1, CMD_ENTER_LINK_MODE)
                .aliased(Field::Cmd2, 0x00, "group"),
        );
        schema.register(
            CommandTemplate::direct("get_engine_version", std)
                .field(Field::Cmd1, CMD_ENGINE_VERSION),
        );
        schema.register(
            CommandTemplate::direct("light_status_request", std)
                .field(Field::Cmd1, CMD_STATUS_REQUEST),
        );
        schema.register(
            CommandTemplate::direct("id_request", std)
                .field(Field::Cmd1, CMD_ID_REQUEST)
                .two_phase(),
        );
        schema.register(
            CommandTemplate::direct("on", std)
                .field(Field::Cmd1, CMD_ON)
                .aliased(Field::Cmd2, 0xFF, "level"),
        );
        schema.register(CommandTemplate::direct("off", std).field(Field::Cmd1, CMD_OFF));
        schema.register(
            CommandTemplate::direct("set_address_msb", std)
                .field(Field::Cmd1, CMD_SET_ADDRESS_MSB)
                .aliased(Field::Cmd2, 0x00, "msb"),
        );
        schema.register(
            CommandTemplate::direct("peek_one_byte", std)
                .field(Field::Cmd1, CMD_PEEK_ONE_BYTE)
                .aliased(Field::Cmd2, 0x00, "lsb"),
        );
        schema.register(
            CommandTemplate::direct("read_aldb", ext)
                .field(Field::Cmd1, CMD_EXTENDED_ALDB)
                .aliased(Field::Usr(3), 0x00, "msb")
                .aliased(Field::Usr(4), 0x00, "lsb")
                // 0x00 = all records, 0x01 = one record
                .aliased(Field::Usr(5), 0x01, "num_records")
                .two_phase(),
        );
        schema.register(
            CommandTemplate::direct("write_aldb", ext)
                .field(Field::Cmd1, CMD_EXTENDED_ALDB)
                .field(Field::Usr(2), 0x02)
                .aliased(Field::Usr(3), 0x00, "msb")
                .aliased(Field::Usr(4), 0x00, "lsb")
                .aliased(Field::Usr(5), 0x08, "num_bytes")
                .aliased(Field::Usr(6), 0x00, "link_flags")
                .aliased(Field::Usr(7), 0x00, "group")
                .aliased(Field::Usr(8), 0x00, "dev_addr_hi")
                .aliased(Field::Usr(9), 0x00, "dev_addr_mid")
                .aliased(Field::Usr(10), 0x00, "dev_addr_low")
                .aliased(Field::Usr(11), 0x00, "data_1")
                .aliased(Field::Usr(12), 0x00, "data_2")
                .aliased(Field::Usr(13), 0x00, "data_3"),
        );
        schema.register(
            CommandTemplate::modem("all_link_start", MODEM_START_LINKING)
                .field(Field::LinkCode, 0x01)
                .field(Field::Group, 0x00),
        );

        schema
    }

    /// Add or replace a template
    pub fn register(&mut self, template: CommandTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Look up a template by command name
    pub fn template(&self, name: &str) -> Result<&CommandTemplate, SchemaError> {
        self.templates
            .get(name)
            .ok_or_else(|| SchemaError::UnknownCommand(name.to_string()))
    }

    /// Check if a command is known
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Check if the schema is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
