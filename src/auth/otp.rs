use rand::rngs::OsRng;
use rand::Rng;

const OTP_MIN: u32 = 100_000;
const OTP_MAX_EXCLUSIVE: u32 = 1_000_000;

/// Draws a six-digit code uniformly from 100000..=999999 using the OS CSPRNG.
pub fn generate_code() -> String {
    let code = OsRng.gen_range(OTP_MIN..OTP_MAX_EXCLUSIVE);
    format!("{:06}", code)
}

pub fn sms_body(code: &str, lifetime_minutes: i64) -> String {
    format!("Your OTP is: {}. Valid for {} minutes.", code, lifetime_minutes)
}
