pub mod timeline;

pub use timeline::{
    DateRange, EXPECTED_SLOT_COUNT, LabelParseError, MONTHS_IN_WINDOW, SlotLabel,
    THIRTY_DAYS_LABEL, THIRTY_DAY_SPAN_DAYS, month_start, shift_months, trailing_month_starts,
};
