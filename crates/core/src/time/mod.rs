pub mod ecb_calendar;
