// Ports, loop timing, and hardware constants
use std::time::Duration;

// Protocol ports (fixed by the control protocol, not configurable)
pub const COMMAND_PORT: u16 = 50001; // car listens ON this port
pub const TELEMETRY_PORT: u16 = 50002; // car sends FROM this port, controller listens ON it

// Control loop tick period
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

// Telemetry broadcast period
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(500);

/// Ticks a motion command keeps driving in step mode before the auto-stop kicks in
pub const STEP_TICKS: u32 = 150;

/// Consecutive telemetry send failures before the socket is torn down and rebuilt
pub const MAX_SEND_FAILURES: u32 = 10;

// Motor PWM carrier frequency
pub const PWM_FREQ_HZ: u32 = 60_000;

// Default sysfs PWM chip (pass --simulate to run without hardware)
pub const PWM_CHIP: &str = "/sys/class/pwm/pwmchip0";
