//! Constants used in GlobalPlatform operations
//!
//! Class bytes, instruction codes, parameter values, status words and tags
//! used by the card manager.

/// GlobalPlatform command classes
pub mod cla {
    /// ISO7816 command class
    pub const ISO7816: u8 = 0x00;
    /// GlobalPlatform command class
    pub const GP: u8 = 0x80;
    /// Secure messaging indicator OR-ed into the class byte
    pub const SECURE_MESSAGING: u8 = 0x04;
}

/// GlobalPlatform instruction codes
pub mod ins {
    /// SELECT command
    pub const SELECT: u8 = 0xA4;
    /// INITIALIZE UPDATE command
    pub const INITIALIZE_UPDATE: u8 = 0x50;
    /// EXTERNAL AUTHENTICATE command
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// GET RESPONSE command
    pub const GET_RESPONSE: u8 = 0xC0;
    /// GET DATA command
    pub const GET_DATA: u8 = 0xCA;
    /// DELETE command
    pub const DELETE: u8 = 0xE4;
    /// LOAD command
    pub const LOAD: u8 = 0xE8;
    /// INSTALL command
    pub const INSTALL: u8 = 0xE6;
    /// GET STATUS command
    pub const GET_STATUS: u8 = 0xF2;
    /// PUT KEY command
    pub const PUT_KEY: u8 = 0xD8;
}

/// Parameter values for SELECT command (P1)
pub mod select_p1 {
    /// Select by DF name
    pub const BY_NAME: u8 = 0x04;
}

/// Parameter values for INSTALL command (P1)
pub mod install_p1 {
    /// Install for load
    pub const FOR_LOAD: u8 = 0x02;
    /// Install for install
    pub const FOR_INSTALL: u8 = 0x04;
    /// Install for make selectable
    pub const FOR_MAKE_SELECTABLE: u8 = 0x08;
    /// Install for install and make selectable
    pub const FOR_INSTALL_AND_MAKE_SELECTABLE: u8 = FOR_INSTALL | FOR_MAKE_SELECTABLE;
}

/// Parameter values for LOAD command (P1)
pub mod load_p1 {
    /// More blocks to follow
    pub const MORE_BLOCKS: u8 = 0x00;
    /// Last block
    pub const LAST_BLOCK: u8 = 0x80;
}

/// Parameter values for GET STATUS command (P1)
pub mod get_status_p1 {
    /// Get status of issuer security domain
    pub const ISSUER_SECURITY_DOMAIN: u8 = 0x80;
    /// Get status of applications and supplementary security domains
    pub const APPLICATIONS: u8 = 0x40;
    /// Get status of executable load files
    pub const EXEC_LOAD_FILES: u8 = 0x20;
    /// Get status of executable load files and modules
    pub const EXEC_LOAD_FILES_AND_MODULES: u8 = 0x10;
}

/// Parameter values for GET STATUS command (P2)
pub mod get_status_p2 {
    /// Return data in the legacy fixed format
    pub const LEGACY_DATA: u8 = 0x00;
    /// Return data in TLV format
    pub const TLV_DATA: u8 = 0x02;
    /// Next occurrence flag
    pub const NEXT: u8 = 0x01;
}

/// Parameter values for DELETE command (P2)
pub mod delete_p2 {
    /// Delete object
    pub const OBJECT: u8 = 0x00;
    /// Delete object and related objects
    pub const OBJECT_AND_RELATED: u8 = 0x80;
}

/// Parameter values for PUT KEY command (P2)
pub mod put_key_p2 {
    /// Several keys follow in the data field
    pub const MULTIPLE_KEYS: u8 = 0x80;
}

/// Security levels for EXTERNAL AUTHENTICATE (P1)
pub mod security_level {
    /// No secure messaging
    pub const CLEAR: u8 = 0x00;
    /// C-MAC on every command
    pub const CMAC: u8 = 0x01;
    /// C-MAC plus command data encryption
    pub const CMAC_CDEC: u8 = 0x03;
}

/// GET DATA tags (P1P2)
pub mod get_data {
    /// Card Production Life Cycle data
    pub const CPLC: [u8; 2] = [0x9F, 0x7F];
    /// Key information template
    pub const KEY_INFORMATION_TEMPLATE: [u8; 2] = [0x00, 0xE0];
}

/// Commonly used status words in GlobalPlatform
pub mod status {
    use crate::globalplatform::apdu::StatusWord;

    /// Success
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    /// More data available through GET STATUS [next]
    pub const MORE_DATA: StatusWord = StatusWord::new(0x63, 0x10);
    /// Conditions of use not satisfied
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);
    /// Incorrect parameters P1-P2
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);
    /// Referenced data not found
    pub const REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);
    /// Security condition not satisfied
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
}

/// Tags used in GlobalPlatform commands and responses
pub mod tags {
    /// AID tag
    pub const AID: u8 = 0x4F;
    /// Load file data block tag
    pub const LOAD_FILE_DATA_BLOCK: u8 = 0xC4;
    /// Application specific install parameters
    pub const INSTALL_PARAMETERS: u8 = 0xC9;
    /// GP registry related data template
    pub const REGISTRY_ENTRY: u8 = 0xE3;
    /// Life cycle state (two byte tag 9F70)
    pub const LIFE_CYCLE_STATE: [u8; 2] = [0x9F, 0x70];
    /// Privileges
    pub const PRIVILEGES: u8 = 0xC5;
    /// Executable module AID
    pub const EXECUTABLE_MODULE_AID: u8 = 0x84;
    /// Key information data
    pub const KEY_INFORMATION: u8 = 0xC0;
}

/// Key type identifiers used by PUT KEY and the key information template
pub mod key_type {
    /// DES key in ECB/CBC mode
    pub const DES: u8 = 0x80;
    /// AES key
    pub const AES: u8 = 0x88;
}

/// Default issuer security domain AID
pub const SECURITY_DOMAIN_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x51, 0x00, 0x00, 0x00];
