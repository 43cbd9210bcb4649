//! Synthetic message builder.
//!
//! Builds minimal, structurally valid edition-2 messages (sections 0-8,
//! lat/lon grid template 3.0, product template 4.0, simple packing
//! template 5.0) so decode and index tests never need real model output
//! on disk.

/// Builder for one synthetic edition-2 message.
pub struct MessageBuilder {
    discipline: u8,
    centre: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    parameter_category: u8,
    parameter_number: u8,
    surface_type: u8,
    scaled_surface_value: u32,
    forecast_hour: u32,
    ni: u32,
    nj: u32,
    data_values: Vec<f64>,
}

impl MessageBuilder {
    /// Defaults: temperature (0/0/0) at 850 mb from centre 98, a 4x3
    /// grid of zeros.
    pub fn new() -> Self {
        let ni = 4;
        let nj = 3;
        Self {
            discipline: 0,
            centre: 98,
            year: 2025,
            month: 12,
            day: 10,
            hour: 12,
            parameter_category: 0,
            parameter_number: 0,
            surface_type: 100,            // isobaric surface
            scaled_surface_value: 85_000, // Pa
            forecast_hour: 0,
            ni,
            nj,
            data_values: vec![0.0; (ni * nj) as usize],
        }
    }

    pub fn with_centre(mut self, centre: u16) -> Self {
        self.centre = centre;
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.parameter_category = category;
        self.parameter_number = number;
        self
    }

    /// Surface type and its scaled value. Isobaric surfaces (type 100)
    /// take the value in Pa, e.g. 85000 for 850 mb.
    pub fn with_level(mut self, surface_type: u8, scaled_value: u32) -> Self {
        self.surface_type = surface_type;
        self.scaled_surface_value = scaled_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    pub fn with_constant_value(mut self, value: f64) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    pub fn with_data(mut self, data: Vec<f64>) -> Self {
        self.data_values = data;
        self
    }

    /// Assemble the complete message bytes.
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.section1(),
            self.section3(),
            self.section4(),
            self.section5(),
            self.section6(),
            self.section7(),
        ];

        let total_length = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(total_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]); // reserved
        message.push(self.discipline);
        message.push(2); // edition
        message.extend_from_slice(&(total_length as u64).to_be_bytes());

        for section in &sections {
            message.extend_from_slice(section);
        }

        message.extend_from_slice(b"7777");
        message
    }

    fn section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.centre.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // sub-centre
        section.push(2); // master tables version
        section.push(1); // local tables version
        section.push(1); // significance of reference time

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // minute
        section.push(0); // second

        section.push(0); // production status
        section.push(1); // type of data
        section
    }

    fn section3(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&72u32.to_be_bytes());
        section.push(3);

        section.push(0); // source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0); // octets for optional list
        section.push(0); // interpretation
        section.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        section.push(6); // shape of earth
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());

        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // subdivisions

        section.extend_from_slice(&sign_magnitude_u32(60_000_000).to_be_bytes()); // La1
        section.extend_from_slice(&sign_magnitude_u32(0).to_be_bytes()); // Lo1
        section.push(48); // resolution and component flags
        section.extend_from_slice(&sign_magnitude_u32(50_000_000).to_be_bytes()); // La2
        section.extend_from_slice(&sign_magnitude_u32(10_000_000).to_be_bytes()); // Lo2
        section.extend_from_slice(&1_000_000u32.to_be_bytes()); // Di
        section.extend_from_slice(&1_000_000u32.to_be_bytes()); // Dj
        section.push(0); // scanning mode
        section
    }

    fn section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // template 4.0

        section.push(self.parameter_category);
        section.push(self.parameter_number);
        section.push(2); // type of generating process
        section.push(0); // background process
        section.push(0); // analysis/forecast process
        section.extend_from_slice(&0u16.to_be_bytes()); // hours of cutoff
        section.push(0); // minutes of cutoff
        section.push(1); // time range unit (hours)
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());

        section.push(self.surface_type);
        section.push(0); // scale factor of first fixed surface
        section.extend_from_slice(&self.scaled_surface_value.to_be_bytes());

        section.push(255); // second fixed surface: none
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section
    }

    fn section5(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();

        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);

        section.extend_from_slice(&(self.data_values.len() as u32).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // template 5.0

        section.extend_from_slice(&(reference_value as f32).to_be_bytes());
        section.extend_from_slice(&sign_magnitude_u16(binary_scale_factor).to_be_bytes());
        section.extend_from_slice(&sign_magnitude_u16(0).to_be_bytes()); // decimal scale
        section.push(bits_per_value);
        section.push(0); // original field type
        section
    }

    fn section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&6u32.to_be_bytes());
        section.push(6);
        section.push(255); // no bitmap
        section
    }

    fn section7(&self) -> Vec<u8> {
        let packed = self.pack_values();

        let mut section = Vec::new();
        section.extend_from_slice(&((5 + packed.len()) as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }

    /// Reference value, binary scale factor, and bits per value for
    /// 16-bit simple packing. A constant field packs into zero bits.
    fn packing(&self) -> (f64, i16, u8) {
        let (min, max) = self
            .data_values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let range = max - min;
        if range <= 0.0 {
            return (min, 0, 0);
        }
        let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
        (min, binary_scale_factor, 16)
    }

    fn pack_values(&self) -> Vec<u8> {
        let (reference_value, binary_scale_factor, bits_per_value) = self.packing();
        if bits_per_value == 0 {
            return Vec::new();
        }

        let binary_scale = 2f64.powi(binary_scale_factor as i32);
        let mut packed = Vec::with_capacity(self.data_values.len() * 2);
        for &v in &self.data_values {
            let quantized = ((v - reference_value) / binary_scale).round() as u16;
            packed.extend_from_slice(&quantized.to_be_bytes());
        }
        packed
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Concatenate messages into one file image.
pub fn concat_messages(messages: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for m in messages {
        out.extend_from_slice(m);
    }
    out
}

/// Sign-magnitude encoding for 32-bit coded integers.
fn sign_magnitude_u32(value: i32) -> u32 {
    if value < 0 {
        value.unsigned_abs() | 0x8000_0000
    } else {
        value as u32
    }
}

/// Sign-magnitude encoding for 16-bit coded integers.
fn sign_magnitude_u16(value: i16) -> u16 {
    if value < 0 {
        value.unsigned_abs() | 0x8000
    } else {
        value as u16
    }
}
