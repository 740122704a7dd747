pub mod alarms;
pub mod health;
pub mod logs;
pub mod realtime;
