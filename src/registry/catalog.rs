//! Built-in flagship catalog
//!
//! Used when no registry file exists; `backfill init` writes it out as the
//! starting `registry.toml`.

pub const BUILTIN_REGISTRY: &str = r#"
# ---------------------------------------------------------------------------
# World Bank - World Development Indicators
# ---------------------------------------------------------------------------
[[sources]]
id = "wb-wdi"
name = "World Bank - World Development Indicators"
organization = "World Bank"
transport = "api"
status = "active"
auth = "none"
adapter = "world_bank"
url = "https://api.worldbank.org/v2"
license = "CC-BY-4.0"
cadence = "annual"
rate_limit_per_hour = 500
tolerance_days = 60
description = "Annual development indicators for Yemen from the WDI database"
documentation_url = "https://datahelpdesk.worldbank.org/knowledgebase/articles/889386"

[[sources.products]]
id = "wb-gdp"
name = "GDP (current US$)"
frequency = "annual"
unit = "USD"
available_from = "1990-01-01"
regime = "international"
external_code = "NY.GDP.MKTP.CD"
sector = "macroeconomy"

[[sources.products]]
id = "wb-gdp-per-capita"
name = "GDP per capita (current US$)"
frequency = "annual"
unit = "USD"
available_from = "1990-01-01"
regime = "international"
external_code = "NY.GDP.PCAP.CD"
sector = "macroeconomy"

[[sources.products]]
id = "wb-inflation"
name = "Inflation, consumer prices (annual %)"
frequency = "annual"
unit = "percent"
available_from = "1990-01-01"
regime = "international"
external_code = "FP.CPI.TOTL.ZG"
sector = "prices"

[[sources.products]]
id = "wb-population"
name = "Population, total"
frequency = "annual"
unit = "persons"
available_from = "1960-01-01"
regime = "international"
external_code = "SP.POP.TOTL"
sector = "macroeconomy"

[[sources.products]]
id = "wb-unemployment"
name = "Unemployment, total (% of labor force)"
frequency = "annual"
unit = "percent"
available_from = "1991-01-01"
regime = "international"
external_code = "SL.UEM.TOTL.ZS"
sector = "labor_market"

[[sources.products]]
id = "wb-exports-goods-services"
name = "Exports of goods and services (% of GDP)"
frequency = "annual"
unit = "percent"
available_from = "1990-01-01"
regime = "international"
external_code = "NE.EXP.GNFS.ZS"
sector = "trade"

[[sources.products]]
id = "wb-imports-goods-services"
name = "Imports of goods and services (% of GDP)"
frequency = "annual"
unit = "percent"
available_from = "1990-01-01"
regime = "international"
external_code = "NE.IMP.GNFS.ZS"
sector = "trade"

[[sources.products]]
id = "wb-remittances"
name = "Personal remittances, received (current US$)"
frequency = "annual"
unit = "USD"
available_from = "1990-01-01"
regime = "international"
external_code = "BX.TRF.PWKR.CD.DT"
sector = "remittances"

[[sources.products]]
id = "wb-poverty-ratio"
name = "Poverty headcount ratio at $2.15 a day"
frequency = "annual"
unit = "percent"
available_from = "1990-01-01"
regime = "international"
external_code = "SI.POV.DDAY"
sector = "poverty"

# ---------------------------------------------------------------------------
# IMF - International Financial Statistics (SDMX)
# ---------------------------------------------------------------------------
[[sources]]
id = "imf-ifs"
name = "IMF - International Financial Statistics"
organization = "International Monetary Fund"
transport = "sdmx"
status = "active"
auth = "none"
adapter = "imf_sdmx"
url = "http://dataservices.imf.org/REST/SDMX_JSON.svc"
license = "IMF Copyright and Usage"
cadence = "monthly"
rate_limit_per_hour = 1000
tolerance_days = 30
description = "Monthly monetary and price statistics from the IFS dataset"
documentation_url = "https://datahelp.imf.org/knowledgebase/articles/667681"

[[sources.products]]
id = "imf-exchange-rate"
name = "Exchange Rate (LCU per USD, period average)"
frequency = "monthly"
unit = "YER/USD"
available_from = "1990-01-01"
regime = "international"
indicator = "fx-official-rate"
external_code = "ENDA_XDC_USD_RATE"
sector = "currency"

[[sources.products]]
id = "imf-reserves"
name = "Total Reserves (excluding gold, USD)"
frequency = "monthly"
unit = "USD"
available_from = "1990-01-01"
regime = "international"
indicator = "fx-reserves"
external_code = "RAXG_USD"
sector = "banking"

[[sources.products]]
id = "imf-cpi"
name = "Consumer Price Index"
frequency = "monthly"
unit = "index"
available_from = "1990-01-01"
regime = "international"
external_code = "PCPI_IX"
sector = "prices"

# ---------------------------------------------------------------------------
# UNHCR - Population Statistics
# ---------------------------------------------------------------------------
[[sources]]
id = "unhcr-popstats"
name = "UNHCR - Population Statistics"
organization = "UN High Commissioner for Refugees"
transport = "api"
status = "active"
auth = "api_key"
credential_env = "UNHCR_API_KEY"
adapter = "unhcr"
url = "https://api.unhcr.org/population/v1"
license = "CC-BY-4.0"
cadence = "annual"
rate_limit_per_hour = 100
tolerance_days = 90
description = "Refugee, IDP and asylum-seeker stocks originating from Yemen"
documentation_url = "https://api.unhcr.org/docs"

[[sources.products]]
id = "unhcr-refugees"
name = "Refugees"
frequency = "annual"
unit = "persons"
available_from = "2000-01-01"
regime = "international"
external_code = "refugees"
sector = "humanitarian"

[[sources.products]]
id = "unhcr-idps"
name = "Internally Displaced Persons"
frequency = "annual"
unit = "persons"
available_from = "2000-01-01"
regime = "mixed"
external_code = "idps"
sector = "humanitarian"

[[sources.products]]
id = "unhcr-asylum-seekers"
name = "Asylum Seekers"
frequency = "annual"
unit = "persons"
available_from = "2000-01-01"
regime = "international"
external_code = "asylum_seekers"
sector = "humanitarian"

# ---------------------------------------------------------------------------
# OCHA Financial Tracking Service
# ---------------------------------------------------------------------------
[[sources]]
id = "ocha-fts"
name = "OCHA Financial Tracking Service"
organization = "UN OCHA"
transport = "api"
status = "active"
auth = "none"
adapter = "ocha_fts"
url = "https://api.hpc.tools/v2/public/fts"
license = "CC-BY-4.0"
cadence = "daily"
rate_limit_per_hour = 200
tolerance_days = 7
description = "Humanitarian funding flows reported for Yemen"
documentation_url = "https://fts.unocha.org/content/fts-api-documentation"

[[sources.products]]
id = "ocha-funding-total"
name = "Total Humanitarian Funding"
frequency = "daily"
unit = "USD"
available_from = "2000-01-01"
regime = "mixed"
sector = "aid_flows"

[[sources.products]]
id = "ocha-funding-monthly"
name = "Humanitarian Funding (monthly totals)"
frequency = "monthly"
unit = "USD"
available_from = "2000-01-01"
regime = "mixed"
sector = "aid_flows"

# ---------------------------------------------------------------------------
# WFP - Vulnerability Analysis and Mapping
# ---------------------------------------------------------------------------
[[sources]]
id = "wfp-vam"
name = "WFP - Vulnerability Analysis and Mapping"
organization = "World Food Programme"
transport = "api"
status = "requires_key"
auth = "api_key"
credential_env = "WFP_VAM_API_KEY"
adapter = "wfp_vam"
url = "https://api.vam.wfp.org/dataviz/api"
license = "CC-BY-4.0"
cadence = "monthly"
rate_limit_per_hour = 100
tolerance_days = 30
description = "Market prices of food commodities"
documentation_url = "https://dataviz.vam.wfp.org/ApiExplorer"

[[sources.products]]
id = "wfp-food-prices"
name = "Wheat Flour Retail Price"
frequency = "monthly"
unit = "YER/KG"
available_from = "2010-01-01"
regime = "mixed"
external_code = "Wheat flour - Retail"
sector = "food_security"

[[sources.products]]
id = "wfp-market-functionality"
name = "Market Functionality Index"
frequency = "quarterly"
unit = "index"
available_from = "2015-01-01"
regime = "mixed"
sector = "food_security"
# GetMarketPrices does not publish this index, so it has no external_code

# ---------------------------------------------------------------------------
# HDX HAPI - Humanitarian API (no adapter yet)
# ---------------------------------------------------------------------------
[[sources]]
id = "hdx-hapi"
name = "HDX - Humanitarian API"
organization = "Humanitarian Data Exchange"
transport = "api"
status = "requires_key"
auth = "api_key"
credential_env = "HDX_APP_IDENTIFIER"
url = "https://hapi.humdata.org/api/v1"
license = "CC-BY-4.0"
cadence = "monthly"
rate_limit_per_hour = 1000
tolerance_days = 30
description = "Affected population and conflict event counts"
documentation_url = "https://hdx-hapi.readthedocs.io/"

[[sources.products]]
id = "hdx-population-affected"
name = "Affected Population"
frequency = "monthly"
unit = "persons"
available_from = "2015-01-01"
regime = "mixed"
sector = "humanitarian"

[[sources.products]]
id = "hdx-conflict-events"
name = "Conflict Events"
frequency = "daily"
unit = "events"
available_from = "2015-01-01"
regime = "mixed"
sector = "conflict_economy"

# ---------------------------------------------------------------------------
# Central Bank of Yemen - Aden (IRG)
# ---------------------------------------------------------------------------
[[sources]]
id = "cby-aden"
name = "Central Bank of Yemen - Aden"
organization = "CBY Aden (IRG)"
transport = "manual"
status = "requires_partnership"
auth = "none"
url = "https://www.cby-ye.com"
license = "Published bulletin, attribution required"
cadence = "daily"
tolerance_days = 7
contact_email = "info@cby-ye.com"
description = "Bulletins transcribed into drop files until API access is agreed"

[[sources.products]]
id = "cby-aden-exchange-rate"
name = "Official Exchange Rate (CBY Aden)"
frequency = "daily"
unit = "YER/USD"
available_from = "2016-01-01"
regime = "aden_irg"
indicator = "fx-official-rate"
sector = "currency"

[[sources.products]]
id = "cby-aden-reserves"
name = "Foreign Reserves (CBY Aden)"
frequency = "monthly"
unit = "USD"
available_from = "2016-01-01"
regime = "aden_irg"
indicator = "fx-reserves"
sector = "banking"

[[sources.products]]
id = "cby-aden-money-supply"
name = "Money Supply M2 (CBY Aden)"
frequency = "monthly"
unit = "YER"
available_from = "2016-01-01"
regime = "aden_irg"
sector = "banking"

# ---------------------------------------------------------------------------
# Central Bank of Yemen - Sana'a (DFA)
# ---------------------------------------------------------------------------
[[sources]]
id = "cby-sanaa"
name = "Central Bank of Yemen - Sana'a"
organization = "CBY Sana'a (DFA)"
transport = "manual"
status = "requires_partnership"
auth = "none"
url = "https://www.centralbank.gov.ye"
license = "Published report, attribution required"
cadence = "daily"
tolerance_days = 7
description = "Reports transcribed into drop files; partnership negotiations ongoing"

[[sources.products]]
id = "cby-sanaa-exchange-rate"
name = "Official Exchange Rate (CBY Sana'a)"
frequency = "daily"
unit = "YER/USD"
available_from = "2016-01-01"
regime = "sanaa_defacto"
indicator = "fx-official-rate"
sector = "currency"

[[sources.products]]
id = "cby-sanaa-reserves"
name = "Foreign Reserves (CBY Sana'a)"
frequency = "monthly"
unit = "USD"
available_from = "2016-01-01"
regime = "sanaa_defacto"
indicator = "fx-reserves"
sector = "banking"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryFile;

    #[test]
    fn test_catalog_parses() {
        let file: RegistryFile = toml::from_str(BUILTIN_REGISTRY).unwrap();
        assert_eq!(file.sources.len(), 8);
        let products: usize = file.sources.iter().map(|s| s.products.len()).sum();
        assert_eq!(products, 24);
    }
}
