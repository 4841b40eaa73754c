// Tab Snoozer services
// Services provide core functionality: the clock, the host tab opener, the wake scheduler and settings.

pub mod clock;
pub mod settings_engine;
pub mod tab_opener;
pub mod wake_scheduler;
