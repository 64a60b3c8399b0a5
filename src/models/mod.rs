pub mod tft;
