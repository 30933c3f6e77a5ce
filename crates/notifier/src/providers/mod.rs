//! Vendor adapters.
//!
//! | Channel  | Name              | Vendor                    |
//! |----------|-------------------|---------------------------|
//! | sms      | `twilio`          | Twilio Messages           |
//! | sms      | `aws-sns`         | Amazon SNS                |
//! | whatsapp | `twilio-whatsapp` | Twilio Messages           |
//! | whatsapp | `meta-api`        | WhatsApp Cloud API        |
//! | email    | `sendgrid`        | SendGrid v3 mail          |
//! | email    | `aws-ses`         | Amazon SES v2             |

mod aws_ses;
mod aws_sns;
mod meta;
mod sendgrid;
mod twilio;

pub use aws_ses::AwsSesProvider;
pub use aws_sns::AwsSnsProvider;
pub use meta::MetaWhatsappProvider;
pub use sendgrid::SendGridProvider;
pub use twilio::TwilioProvider;
