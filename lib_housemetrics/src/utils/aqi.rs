//! PM2.5 concentration (µg/m³) to US EPA AQI, by linear interpolation
//! inside the breakpoint bracket the concentration falls into.

struct Bracket {
    /// Concentrations in `[from, to)` use this bracket.
    from: f64,
    to: f64,
    bp_low: f64,
    bp_high: f64,
    aqi_low: f64,
    aqi_high: f64,
}

const fn bracket(from: f64, to: f64, bp_low: f64, bp_high: f64, aqi_low: f64, aqi_high: f64) -> Bracket {
    Bracket {
        from,
        to,
        bp_low,
        bp_high,
        aqi_low,
        aqi_high,
    }
}

const BRACKETS: [Bracket; 6] = [
    bracket(0.0, 9.1, 0.0, 9.0, 0.0, 50.0),
    bracket(9.1, 35.5, 9.0, 35.4, 50.0, 100.0),
    bracket(35.5, 55.5, 35.5, 55.4, 100.0, 150.0),
    bracket(55.5, 125.5, 55.5, 125.4, 150.0, 200.0),
    bracket(125.5, 225.5, 125.5, 225.4, 200.0, 300.0),
    bracket(225.5, 325.5, 225.5, 325.4, 300.0, 500.0),
];

impl Bracket {
    fn interpolate(&self, c: f64) -> i64 {
        let aqi = (self.aqi_high - self.aqi_low) / (self.bp_high - self.bp_low) * (c - self.bp_low)
            + self.aqi_low;
        aqi.round() as i64
    }
}

/// Converts a PM2.5 concentration to an AQI value.
///
/// Concentrations past the table are extrapolated from the top bracket;
/// negative readings (sensor noise) count as zero.
pub fn pm25_to_aqi(c: f64) -> i64 {
    let c = c.max(0.0);
    let top = &BRACKETS[BRACKETS.len() - 1];
    BRACKETS
        .iter()
        .find(|b| b.from <= c && c < b.to)
        .unwrap_or(top)
        .interpolate(c)
}
