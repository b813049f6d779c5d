// Maximum length of a DCC packet, including the XOR byte
pub const MAX_PACKET_SIZE: usize = 6;

// Number of opto-coupler button inputs on the X8 connector
pub const MAX_INPUT_PINS: usize = 4;

pub mod cv {
    // Indices into the configuration-variable table (0-based; CV1 is index 0)
    pub const ADDR_LOW: usize = 0; // Accessory address, low 6 bits
    pub const VERSION: usize = 6; // Software version, read only
    pub const VENDOR_ID: usize = 7; // Writing RESET_SENTINEL here restores defaults
    pub const ADDR_HIGH: usize = 8; // Accessory address, high 3 bits (0x80 = unprogrammed)
    pub const RS_ADDR: usize = 9; // Feedback-bus address (1..128, 0 = unset)
    pub const CMD_STATION: usize = 18; // 1 = Lenz master station address quirk
    pub const RS_RETRY: usize = 19; // Feedback-bus retransmissions
    pub const SKIP_UNEVEN: usize = 20; // Decoder occupies address pairs
    pub const SEARCH: usize = 22; // Find function: 1 = blink indicator. Volatile
    pub const RESTART: usize = 24; // Non-zero write restarts the decoder. Volatile
    pub const DCC_QUALITY: usize = 25; // Checksum-error counter. Volatile
    pub const DEC_TYPE: usize = 26;
    pub const BIDI: usize = 27;
    pub const CONFIG: usize = 28; // Bit 6: 0 = basic, 1 = extended accessory addressing
    pub const VENDOR_ID_2: usize = 29; // Second vendor byte of the signature
    pub const SEND_FB: usize = 32; // Decoder sends button feedback reports
    pub const EMERGENCY_PIN: usize = 33; // Which input pin is the emergency button (1-based)
    pub const T_WATCHDOG: usize = 34; // Watchdog hold time, seconds
    pub const T_TRAIN_MOVE: usize = 35; // Grace period for the PC to stop trains, 100 ms steps
    pub const T_CHECK_MOVE: usize = 36; // Interval we watch for residual movement, 100 ms steps
    pub const T_PUSH_1: usize = 37; // Report hold time per button, 20 ms steps; 0 = toggle
    pub const T_PUSH_4: usize = 40;

    pub const TABLE_SIZE: usize = 41;

    pub const RESET_SENTINEL: u8 = 0x0D;
    pub const VENDOR_SIGNATURE: u8 = 0x0D; // DIY decoder vendor id
}

pub mod timing {
    // Everything below is counted in 20 ms process ticks unless noted
    pub const TICK_MS: u32 = 20;
    pub const TICKS_PER_SECOND: u16 = 50;
    pub const TICKS_PER_100_MS: u16 = 5;

    pub const POM_WINDOW_TICKS: u16 = 100; // 2 s dedup window for config writes
    pub const SERVICE_MODE_TICKS: u32 = 2; // 40 ms without a service-mode frame ends it

    pub const DEBOUNCE_HOLD_TICKS: u8 = 20; // pin ignored after a push
    pub const INTEGRATOR_LOW: u8 = 0;
    pub const INTEGRATOR_HIGH: u8 = 4;

    pub const FLASH_TICKS: u8 = 25; // lamp half period, normal flash
    pub const FLASH_FAST_TICKS: u8 = 7; // lamp half period, fast flash
}

pub mod bus {
    // The master polls this many address slots per cycle, one transition each
    pub const SLOTS_PER_CYCLE: u16 = 130;
    pub const MAX_SLAVE_ADDRESS: u8 = 128;
    // Registration handshakes and configuration-value replies go to this
    // slot; ordinary reports use the configured decoder slot
    pub const REGISTRATION_SLOT: u8 = 128;

    pub const IDLE_LIMIT_MS: u8 = 4; // quiet gap that ends a polling cycle
    pub const INACTIVE_LIMIT_MS: u8 = 200; // quiet period that means master reset
}

pub mod dcc {
    pub const PREAMBLE_MIN_ONES: u8 = 10;
    pub const DEVICES_PER_DECODER: u16 = 4; // ports per accessory address
    pub const LOCO_ADDRESS_OFFSET: u16 = 7000; // PoM loco address = decoder address + offset
    pub const BROADCAST_BASIC: u16 = 0x01FF;
    pub const BROADCAST_EXTENDED: u16 = 0x07FF;
    pub const INVALID_DECODER_ADDRESS: u16 = 0xFFFF; // decoder not programmed yet
}
